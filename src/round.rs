//! Round state machine
//!
//! One [`RoundMachine`] runs every round of a session, for either role. On
//! the lecturer side it is authoritative: it publishes questions, collects
//! answers and scores the round when the deadline alarm fires. On the
//! student side it observes the published rounds, records the student's own
//! pick and displays the results the lecturer broadcasts.
//!
//! The machine is synchronous. Every operation returns a [`Step`] holding
//! the events to send outward and the updates for the local view, so the
//! caller decides how they travel. Timers are requested from a
//! [`Scheduler`] and the handles are owned here; [`RoundMachine::cancel_timers`]
//! is the only place they are released.

use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    constants::round::{DEADLINE_GRACE_MS, DEFAULT_ROUND_MS, TICK_MS},
    event::RoundEvent,
    leaderboard::{Leaderboard, LeaderboardRow, OptionCount, tally},
    mcq::{self, Answer, Mcq, PublicMcq},
    scheduler::{AlarmMessage, Scheduler, TimerHandle},
    session::Role,
};

/// Phase of the round machine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// No round has been published yet
    #[default]
    Idle,
    /// A question is published and accepting answers
    Active,
    /// The last round finished; waiting for the next question
    Ended,
    /// The session is over; nothing happens anymore
    Terminal,
}

/// Final tally of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResults {
    /// Question of the round
    pub mcq_id: String,
    /// Answers per option, every declared option present
    pub counts: Vec<OptionCount>,
    /// The correct option
    pub correct_option_id: String,
    /// Leaderboard after the round
    pub top: Vec<LeaderboardRow>,
}

impl RoundResults {
    /// Number of answers an option received
    pub fn count(&self, option_id: &str) -> usize {
        self.counts
            .iter()
            .find(|c| c.option_id == option_id)
            .map_or(0, |c| c.count)
    }
}

/// Countdown values for re-rendering a running round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Countdown {
    /// Whole seconds left, rounded up
    pub seconds_left: u64,
    /// Remaining share of the round in percent (0 to 100)
    pub progress: u8,
}

/// Changes the local view should reflect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// A round started
    Published(PublicMcq),
    /// An answer was recorded
    AnswerRecorded {
        /// Who answered
        student: String,
        /// Answers recorded so far this round
        answers: usize,
    },
    /// Countdown tick
    Tick(Countdown),
    /// The deadline passed; answers are no longer accepted
    TimeUp,
    /// New leaderboard to display
    Leaderboard(Vec<LeaderboardRow>),
    /// The round ended with these results
    Ended(RoundResults),
    /// The session is over
    SessionEnded,
}

/// Outcome of one operation on the machine
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Step {
    /// Events to send to the other side, in order
    pub outbound: Vec<RoundEvent>,
    /// Changes for the local view, in order
    pub updates: Vec<Update>,
}

impl Step {
    /// Whether the operation changed nothing
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.updates.is_empty()
    }
}

/// Errors of operations a caller triggers directly
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A round is still running
    #[error("a round is already active")]
    RoundActive,
    /// The session already ended
    #[error("the session has ended")]
    SessionEnded,
    /// Only the lecturer can publish questions
    #[error("only the lecturer can publish questions")]
    NotAuthoritative,
    /// There is no round to answer
    #[error("no round is active")]
    NoActiveRound,
    /// The answer came after the deadline
    #[error("the deadline has passed")]
    DeadlinePassed,
    /// This student already answered the round
    #[error("already answered this round")]
    AlreadyAnswered,
    /// The option is not part of the question
    #[error("unknown option {0:?}")]
    UnknownOption(String),
    /// The question cannot be used
    #[error(transparent)]
    InvalidQuestion(#[from] mcq::Error),
}

/// The state of one round
#[derive(Debug, Clone)]
struct Round {
    public: PublicMcq,
    /// Only known on the lecturer side
    mcq: Option<Mcq>,
    /// First answer of each student, in arrival order
    answers: Vec<Answer>,
}

impl Round {
    fn has_answered(&self, student: &str) -> bool {
        self.answers.iter().any(|a| a.student == student)
    }
}

/// Comparable view of the machine's state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase
    pub phase: Phase,
    /// Question of the current or last round
    pub mcq: Option<PublicMcq>,
    /// Answers recorded in the current or last round
    pub answers: Vec<Answer>,
    /// Results of the last finished round
    pub results: Option<RoundResults>,
    /// Displayed leaderboard
    pub top: Vec<LeaderboardRow>,
    /// Number of timers still held
    pub timers: usize,
}

/// Runs the rounds of one session for one role
#[derive(Debug)]
pub struct RoundMachine<S: Scheduler> {
    code: String,
    role: Role,
    round_ms: u64,
    scheduler: S,
    phase: Phase,
    round: Option<Round>,
    results: Option<RoundResults>,
    top: Vec<LeaderboardRow>,
    leaderboard: Leaderboard,
    timers: Vec<TimerHandle>,
}

impl<S: Scheduler> RoundMachine<S> {
    /// Creates an idle machine for session `code`
    pub fn new(code: impl Into<String>, role: Role, scheduler: S) -> Self {
        Self {
            code: code.into(),
            role,
            round_ms: DEFAULT_ROUND_MS,
            scheduler,
            phase: Phase::Idle,
            round: None,
            results: None,
            top: Vec::new(),
            leaderboard: Leaderboard::default(),
            timers: Vec::new(),
        }
    }

    /// Sets the duration used by the next published round
    #[must_use]
    pub fn with_round_ms(mut self, round_ms: u64) -> Self {
        self.round_ms = round_ms;
        self
    }

    /// Changes the duration used by the next published round
    pub fn set_round_ms(&mut self, round_ms: u64) {
        self.round_ms = round_ms;
    }

    /// Session code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Role of this machine
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Duration of the next published round
    pub fn round_ms(&self) -> u64 {
        self.round_ms
    }

    /// Question of the current or last round
    pub fn current(&self) -> Option<&PublicMcq> {
        self.round.as_ref().map(|r| &r.public)
    }

    /// Answers recorded in the current or last round
    pub fn answers(&self) -> &[Answer] {
        self.round.as_ref().map_or(&[], |r| r.answers.as_slice())
    }

    /// Whether `student` answered the current round
    pub fn has_answered(&self, student: &str) -> bool {
        self.round.as_ref().is_some_and(|r| r.has_answered(student))
    }

    /// Results of the last finished round
    pub fn results(&self) -> Option<&RoundResults> {
        self.results.as_ref()
    }

    /// Displayed leaderboard
    pub fn top(&self) -> &[LeaderboardRow] {
        &self.top
    }

    /// Cumulative scores, only filled on the lecturer side
    pub fn leaderboard(&self) -> &Leaderboard {
        &self.leaderboard
    }

    /// Comparable view of the state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            mcq: self.current().cloned(),
            answers: self.answers().to_vec(),
            results: self.results.clone(),
            top: self.top.clone(),
            timers: self.timers.len(),
        }
    }

    /// Countdown of the running round at `now_ms`
    ///
    /// # Returns
    ///
    /// `None` when no round is active
    pub fn countdown(&self, now_ms: u64) -> Option<Countdown> {
        if self.phase != Phase::Active {
            return None;
        }
        let public = &self.round.as_ref()?.public;
        let remaining = public.deadline_ms.saturating_sub(now_ms);
        let progress = if public.round_ms == 0 {
            0
        } else {
            (remaining.saturating_mul(100) / public.round_ms).min(100) as u8
        };

        Some(Countdown {
            seconds_left: remaining.div_ceil(1_000),
            progress,
        })
    }

    /// Compare-and-set of the phase
    ///
    /// # Returns
    ///
    /// `true` if the phase was `before` and is now `after`
    fn change_state(&mut self, before: Phase, after: Phase) -> bool {
        if self.phase == before {
            self.phase = after;
            true
        } else {
            false
        }
    }

    fn arm_timers(&mut self, mcq_id: &str, deadline_in: Duration) {
        let tick = self.scheduler.every(
            AlarmMessage::Tick {
                mcq_id: mcq_id.to_owned(),
            },
            Duration::from_millis(TICK_MS),
        );
        let deadline = self.scheduler.once(
            AlarmMessage::Deadline {
                mcq_id: mcq_id.to_owned(),
            },
            deadline_in,
        );
        self.timers.extend([tick, deadline]);
    }

    /// Releases every held timer
    ///
    /// Runs on round end, session end and drop.
    pub fn cancel_timers(&mut self) {
        self.timers.drain(..).for_each(TimerHandle::cancel);
    }

    /// Starts a round with `mcq` (lecturer)
    ///
    /// The deadline is fixed at `now_ms + round_ms`; the deadline alarm is
    /// armed with a small grace on top of it.
    ///
    /// # Errors
    ///
    /// * `Error::NotAuthoritative` - called on a student machine
    /// * `Error::SessionEnded` - the session is over
    /// * `Error::RoundActive` - the previous round is still running
    /// * `Error::InvalidQuestion` - the question fails validation
    pub fn publish(&mut self, mcq: Mcq, now_ms: u64) -> Result<Step, Error> {
        if !self.role.is_authoritative() {
            return Err(Error::NotAuthoritative);
        }
        match self.phase {
            Phase::Terminal => return Err(Error::SessionEnded),
            Phase::Active => return Err(Error::RoundActive),
            Phase::Idle | Phase::Ended => {}
        }
        mcq.check()?;

        let public = mcq.publish(now_ms, self.round_ms);
        info!(code = %self.code, mcq_id = %public.id, deadline_ms = public.deadline_ms, "round published");

        self.cancel_timers();
        self.arm_timers(&public.id, Duration::from_millis(self.round_ms + DEADLINE_GRACE_MS));
        self.round = Some(Round {
            public: public.clone(),
            mcq: Some(mcq),
            answers: Vec::new(),
        });
        self.results = None;
        self.phase = Phase::Active;

        Ok(Step {
            outbound: vec![RoundEvent::McqPublished {
                code: self.code.clone(),
                mcq: public.clone(),
            }],
            updates: vec![Update::Published(public)],
        })
    }

    /// Records the student's own pick
    ///
    /// # Errors
    ///
    /// * `Error::SessionEnded` - the session is over
    /// * `Error::NoActiveRound` - nothing to answer
    /// * `Error::UnknownOption` - the option is not part of the question
    /// * `Error::AlreadyAnswered` - the student already picked
    /// * `Error::DeadlinePassed` - `now_ms` is past the deadline; nothing is sent
    pub fn submit(&mut self, student: &str, option_id: &str, now_ms: u64) -> Result<Step, Error> {
        match self.phase {
            Phase::Terminal => return Err(Error::SessionEnded),
            Phase::Idle | Phase::Ended => return Err(Error::NoActiveRound),
            Phase::Active => {}
        }
        let round = self.round.as_mut().ok_or(Error::NoActiveRound)?;

        if !round.public.has_option(option_id) {
            return Err(Error::UnknownOption(option_id.to_owned()));
        }
        if round.has_answered(student) {
            return Err(Error::AlreadyAnswered);
        }
        if now_ms > round.public.deadline_ms {
            debug!(code = %self.code, student, "answer after deadline rejected");
            return Err(Error::DeadlinePassed);
        }

        let answer = Answer {
            student: student.to_owned(),
            option_id: option_id.to_owned(),
            responded_at_ms: now_ms,
        };
        round.answers.push(answer.clone());
        let answers = round.answers.len();
        let mcq_id = round.public.id.clone();

        Ok(Step {
            outbound: vec![RoundEvent::answer(self.code.clone(), mcq_id, answer)],
            updates: vec![Update::AnswerRecorded {
                student: student.to_owned(),
                answers,
            }],
        })
    }

    /// Ends the session (lecturer)
    ///
    /// Calling it again, or after a `session_ended` was received, changes
    /// nothing.
    pub fn end_session(&mut self) -> Step {
        let mut step = self.terminate();
        if !step.is_empty() {
            step.outbound.push(RoundEvent::SessionEnded {
                code: self.code.clone(),
            });
        }
        step
    }

    fn terminate(&mut self) -> Step {
        if self.phase == Phase::Terminal {
            return Step::default();
        }
        info!(code = %self.code, "session ended");

        self.cancel_timers();
        self.round = None;
        self.results = None;
        self.phase = Phase::Terminal;

        Step {
            outbound: Vec::new(),
            updates: vec![Update::SessionEnded],
        }
    }

    /// Applies an event received from the bus
    ///
    /// Events for another session and every event after the session ended
    /// are ignored. The lecturer ignores echoes of what it published itself.
    pub fn handle_event(&mut self, event: &RoundEvent, now_ms: u64) -> Step {
        if event.code() != self.code || self.phase == Phase::Terminal {
            return Step::default();
        }

        match (self.role, event) {
            (_, RoundEvent::SessionEnded { .. }) => self.terminate(),
            (
                Role::Lecturer,
                RoundEvent::AnswerSubmitted {
                    student,
                    mcq_id,
                    option_id,
                    responded_at_ms,
                    ..
                },
            ) => self.record_answer(
                mcq_id,
                Answer {
                    student: student.clone(),
                    option_id: option_id.clone(),
                    responded_at_ms: *responded_at_ms,
                },
                now_ms,
            ),
            (
                Role::Lecturer,
                RoundEvent::McqPublished { .. }
                | RoundEvent::LeaderboardUpdate { .. }
                | RoundEvent::RoundResults { .. },
            )
            | (Role::Student, RoundEvent::AnswerSubmitted { .. }) => Step::default(),
            (Role::Student, RoundEvent::McqPublished { mcq, .. }) => self.observe(mcq, now_ms),
            (Role::Student, RoundEvent::LeaderboardUpdate { top, .. }) => {
                self.top.clone_from(top);
                Step {
                    outbound: Vec::new(),
                    updates: vec![Update::Leaderboard(top.clone())],
                }
            }
            (Role::Student, RoundEvent::RoundResults { results, .. }) => {
                self.accept_results(results)
            }
        }
    }

    /// Applies a scheduler alarm
    ///
    /// Alarms of a round that is no longer active are ignored.
    pub fn on_alarm(&mut self, alarm: &AlarmMessage, now_ms: u64) -> Step {
        let current = self.round.as_ref().map(|r| r.public.id.as_str());
        if self.phase != Phase::Active || current != Some(alarm.mcq_id()) {
            return Step::default();
        }

        match alarm {
            AlarmMessage::Tick { .. } => Step {
                outbound: Vec::new(),
                updates: self.countdown(now_ms).map(Update::Tick).into_iter().collect(),
            },
            AlarmMessage::Deadline { .. } if self.role.is_authoritative() => self.finish(),
            AlarmMessage::Deadline { .. } => {
                self.cancel_timers();
                Step {
                    outbound: Vec::new(),
                    updates: vec![Update::TimeUp],
                }
            }
        }
    }

    fn record_answer(&mut self, mcq_id: &str, answer: Answer, now_ms: u64) -> Step {
        if self.phase != Phase::Active {
            return Step::default();
        }
        let Some(round) = self.round.as_mut() else {
            return Step::default();
        };

        let deadline_ms = round.public.deadline_ms;
        if round.public.id != mcq_id
            || answer.responded_at_ms > deadline_ms
            || now_ms > deadline_ms + DEADLINE_GRACE_MS
            || !round.public.has_option(&answer.option_id)
            || round.has_answered(&answer.student)
        {
            debug!(code = %self.code, student = %answer.student, "answer dropped");
            return Step::default();
        }

        let student = answer.student.clone();
        round.answers.push(answer);

        Step {
            outbound: Vec::new(),
            updates: vec![Update::AnswerRecorded {
                student,
                answers: round.answers.len(),
            }],
        }
    }

    fn observe(&mut self, public: &PublicMcq, now_ms: u64) -> Step {
        if self.current().is_some_and(|c| c.id == public.id) && self.phase != Phase::Idle {
            return Step::default();
        }
        debug!(code = %self.code, mcq_id = %public.id, "observed round started");

        self.cancel_timers();
        let deadline_in = public
            .deadline_ms
            .saturating_sub(now_ms)
            .saturating_add(DEADLINE_GRACE_MS);
        self.arm_timers(&public.id, Duration::from_millis(deadline_in));
        self.round_ms = public.round_ms;
        self.round = Some(Round {
            public: public.clone(),
            mcq: None,
            answers: Vec::new(),
        });
        self.results = None;
        self.phase = Phase::Active;

        Step {
            outbound: Vec::new(),
            updates: vec![Update::Published(public.clone())],
        }
    }

    fn accept_results(&mut self, results: &RoundResults) -> Step {
        if self
            .current()
            .is_some_and(|c| c.id != results.mcq_id)
        {
            return Step::default();
        }
        if self.results.as_ref() == Some(results) {
            return Step::default();
        }

        self.cancel_timers();
        self.phase = Phase::Ended;
        self.results = Some(results.clone());
        self.top.clone_from(&results.top);

        Step {
            outbound: Vec::new(),
            updates: vec![Update::Ended(results.clone())],
        }
    }

    fn finish(&mut self) -> Step {
        if !self.change_state(Phase::Active, Phase::Ended) {
            return Step::default();
        }
        self.cancel_timers();

        let Some(Round {
            public,
            mcq: Some(mcq),
            answers,
        }) = self.round.as_ref()
        else {
            return Step::default();
        };

        let counts = tally(mcq, answers);
        let aggregate =
            self.leaderboard
                .finish_round(answers, mcq, public.deadline_ms, public.round_ms);
        let top = aggregate.top.items().to_vec();

        let results = RoundResults {
            mcq_id: public.id.clone(),
            counts,
            correct_option_id: mcq.correct_option_id.clone(),
            top: top.clone(),
        };
        info!(
            code = %self.code,
            mcq_id = %results.mcq_id,
            answers = answers.len(),
            counts = ?results.counts.iter().map(|c| (c.option_id.as_str(), c.count)).collect_vec(),
            "round finished"
        );

        self.top.clone_from(&top);
        self.results = Some(results.clone());

        Step {
            outbound: vec![
                RoundEvent::LeaderboardUpdate {
                    code: self.code.clone(),
                    top: top.clone(),
                },
                RoundEvent::RoundResults {
                    code: self.code.clone(),
                    results: results.clone(),
                },
            ],
            updates: vec![Update::Leaderboard(top), Update::Ended(results)],
        }
    }
}

impl<S: Scheduler> Drop for RoundMachine<S> {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}
