//! Session drivers
//!
//! A driver wires one session together: the [`Bus`] of its
//! [`SessionContext`], a [`Feed`] of inbound events, a [`RoundMachine`]
//! backed by a [`TokioScheduler`], and the commands of its owner. Each
//! driver runs as a background task that multiplexes these inputs with
//! `tokio::select!` and reports what the view should show as
//! [`ViewUpdate`]s on an mpsc channel. The returned handle only queues
//! commands.
//!
//! The loop stops when the session ends, when the student leaves, or when
//! the handle is dropped. Timers die with the round machine.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    api::{BackendClient, QuestionSelection},
    bus::{Bus, Subscription},
    constants::session::MIN_TRANSCRIPTION_INTERVAL_SECONDS,
    context::{SessionContext, StudentIdentity},
    event::{AnswerResult, ErrorNotice, Event, NewQuestion, QuestionOptions, QuestionSelected},
    leaderboard::FinalSummary,
    mcq::Mcq,
    roster::{ConnectedStudent, Roster},
    round::{self, Phase, RoundMachine, Step, Update},
    scheduler::{AlarmMessage, TokioScheduler, epoch_ms},
    session::Role,
    transcript::TranscriptBatcher,
    transport::{self, Link, OnMessage},
};

/// What the view of a session should reflect
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    /// Change of the round state
    Round(Update),
    /// Students currently connected (lecturer)
    Roster(Vec<ConnectedStudent>),
    /// Generated questions waiting for a pick (lecturer)
    Suggestions(QuestionOptions),
    /// The pending suggestions were resolved (lecturer)
    SuggestionsClosed,
    /// The backend released a question by itself
    Released(NewQuestion),
    /// Feedback on the student's answer
    Feedback(AnswerResult),
    /// A transcript chunk went out (lecturer)
    TranscriptSent(String),
    /// Per-round statistics of the session, right before it ends (lecturer)
    Summary(FinalSummary),
    /// Final results reported by the backend (lecturer)
    FinalResults(serde_json::Value),
    /// A command was refused
    Rejected(String),
    /// The backend reported an error
    BackendError(String),
}

/// Errors queueing a command
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session loop has stopped
    #[error("the session is no longer running")]
    Closed,
}

/// Source of inbound events for a driver
///
/// Whatever the feed hooked into its bus is undone when the feed is
/// dropped, including when a session handle is dropped without ending the
/// session.
#[derive(Debug)]
pub struct Feed {
    inbound: mpsc::UnboundedReceiver<Event>,
    _release: Release,
}

/// Hooks a feed installed on its bus
#[derive(Debug, Default)]
struct Release {
    bus: Option<Bus>,
    link: Option<Arc<Link>>,
    subscription: Option<Subscription>,
}

impl Drop for Release {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            if let Some(bus) = &self.bus {
                bus.detach();
            }
            link.disconnect();
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl Feed {
    /// A feed filled by hand through the returned sender
    pub fn channel() -> (mpsc::UnboundedSender<Event>, Self) {
        let (tx, inbound) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                inbound,
                _release: Release::default(),
            },
        )
    }

    /// A feed of everything emitted on `bus`, for sessions without a backend
    ///
    /// Sessions sharing the bus see each other's events. A driver also sees
    /// its own emits; the round machine ignores those.
    pub fn local(bus: &Bus) -> Self {
        let (tx, inbound) = mpsc::unbounded_channel();
        let subscription = bus.on(Arc::new(move |event: &Event| {
            let _ = tx.send(event.clone());
        }));

        Self {
            inbound,
            _release: Release {
                bus: None,
                link: None,
                subscription: Some(subscription),
            },
        }
    }

    /// A feed from the backend socket of the context's session
    ///
    /// The link is attached to the context's bus, so emitted events go out
    /// on the socket, and every inbound frame is also delivered to the bus
    /// listeners. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`transport::endpoint`]
    pub fn connect(
        ws_base: &Url,
        context: &SessionContext,
        greeting: Option<Event>,
    ) -> Result<Self, transport::Error> {
        let (tx, inbound) = mpsc::unbounded_channel();
        let bus = context.bus.clone();
        let on_message: OnMessage = Arc::new(move |event: Event| {
            bus.deliver(&event);
            let _ = tx.send(event);
        });

        let link = Arc::new(Link::new(ws_base.clone(), on_message));
        link.set_greeting(greeting);
        link.retarget(context.code.as_str(), context.role)?;
        context.bus.attach(link.clone());

        Ok(Self {
            inbound,
            _release: Release {
                bus: Some(context.bus.clone()),
                link: Some(link),
                subscription: None,
            },
        })
    }
}

/// Where a driver's results go
struct Outlet {
    bus: Bus,
    updates: mpsc::UnboundedSender<ViewUpdate>,
}

impl Outlet {
    fn view(&self, update: ViewUpdate) {
        let _ = self.updates.send(update);
    }

    fn dispatch(&self, step: Step) {
        for event in step.outbound {
            self.bus.emit(&event.into());
        }
        for update in step.updates {
            self.view(ViewUpdate::Round(update));
        }
    }
}

fn spawn_handle<C>(task: JoinHandle<()>, commands: mpsc::UnboundedSender<C>) -> Handle<C> {
    Handle {
        commands,
        task: Some(task),
    }
}

/// Command queue and task of a running driver
#[derive(Debug)]
struct Handle<C> {
    commands: mpsc::UnboundedSender<C>,
    task: Option<JoinHandle<()>>,
}

impl<C> Handle<C> {
    fn send(&self, command: C) -> Result<(), Error> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    async fn wait(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                warn!(%error, "session task failed");
            }
        }
    }
}

impl<C> Drop for Handle<C> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Commands of a lecturer session
#[derive(Debug, Clone, PartialEq)]
enum LecturerCommand {
    Publish(Mcq),
    Select(usize),
    Transcript(String),
    FlushTranscript,
    EndSession,
}

/// Handle of a running lecturer session
#[derive(Debug)]
pub struct LecturerSession {
    handle: Handle<LecturerCommand>,
}

impl LecturerSession {
    /// Starts the lecturer side of the context's session
    ///
    /// Rounds last `context.config.round_ms()`. With `api` set, picks are
    /// sent to the backend and ending the session ends it there too.
    ///
    /// # Returns
    ///
    /// The handle and the receiver of view updates
    pub fn start(
        context: SessionContext,
        feed: Feed,
        api: Option<BackendClient>,
    ) -> (Self, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates, update_rx) = mpsc::unbounded_channel();
        let (alarm_tx, alarms) = mpsc::unbounded_channel();

        let machine = RoundMachine::new(
            context.code.as_str(),
            Role::Lecturer,
            TokioScheduler::new(alarm_tx),
        )
        .with_round_ms(context.config.round_ms());

        let lecturer = Lecturer {
            machine,
            outlet: Outlet {
                bus: context.bus.clone(),
                updates,
            },
            context,
            api,
            roster: Roster::new(),
            suggestions: None,
            transcript: TranscriptBatcher::new(),
        };
        let task = tokio::spawn(lecturer_loop(lecturer, command_rx, feed, alarms));

        (
            Self {
                handle: spawn_handle(task, commands),
            },
            update_rx,
        )
    }

    /// Starts a round with `mcq`
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn publish(&self, mcq: Mcq) -> Result<(), Error> {
        self.handle.send(LecturerCommand::Publish(mcq))
    }

    /// Picks suggestion `index` of the pending generated questions and starts a round with it
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn select(&self, index: usize) -> Result<(), Error> {
        self.handle.send(LecturerCommand::Select(index))
    }

    /// Hands over a finished phrase of speech
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn transcript(&self, phrase: impl Into<String>) -> Result<(), Error> {
        self.handle
            .send(LecturerCommand::Transcript(phrase.into()))
    }

    /// Sends whatever transcript is buffered, e.g. when capture stops
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn flush_transcript(&self) -> Result<(), Error> {
        self.handle.send(LecturerCommand::FlushTranscript)
    }

    /// Ends the session
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn end_session(&self) -> Result<(), Error> {
        self.handle.send(LecturerCommand::EndSession)
    }

    /// Waits for the session loop to stop
    pub async fn wait(mut self) {
        self.handle.wait().await;
    }
}

struct Lecturer {
    machine: RoundMachine<TokioScheduler>,
    outlet: Outlet,
    context: SessionContext,
    api: Option<BackendClient>,
    roster: Roster,
    suggestions: Option<QuestionOptions>,
    transcript: TranscriptBatcher,
}

impl Lecturer {
    async fn command(&mut self, command: LecturerCommand) {
        match command {
            LecturerCommand::Publish(mcq) => self.publish(mcq),
            LecturerCommand::Select(index) => self.select(index).await,
            LecturerCommand::Transcript(phrase) => self.transcript.push(&phrase),
            LecturerCommand::FlushTranscript => self.flush_transcript(),
            LecturerCommand::EndSession => self.end_session().await,
        }
    }

    fn publish(&mut self, mcq: Mcq) {
        match self.machine.publish(mcq, epoch_ms()) {
            Ok(step) => self.outlet.dispatch(step),
            Err(error) => {
                debug!(code = %self.context.code, %error, "publish refused");
                self.outlet.view(ViewUpdate::Rejected(error.to_string()));
            }
        }
    }

    async fn select(&mut self, index: usize) {
        if self.machine.phase() == Phase::Active {
            self.outlet
                .view(ViewUpdate::Rejected(round::Error::RoundActive.to_string()));
            return;
        }

        let picked = self.suggestions.as_ref().and_then(|options| {
            options
                .questions
                .iter()
                .find(|q| q.index == Some(index))
                .or_else(|| options.questions.get(index))
                .map(|question| (Mcq::from_generated(question), options.chunk_id.clone()))
        });
        let Some((mcq, chunk_id)) = picked else {
            self.outlet
                .view(ViewUpdate::Rejected(format!("no suggestion {index} to pick")));
            return;
        };

        if let Some(api) = &self.api {
            let selection = QuestionSelection {
                session_id: self.context.code.to_string(),
                selected_question_index: index,
                chunk_id,
            };
            if let Err(error) = api.select_question(&selection).await {
                warn!(code = %self.context.code, %error, "question selection failed");
                self.outlet.view(ViewUpdate::Rejected(error.to_string()));
                return;
            }
        }

        self.suggestions = None;
        self.outlet.view(ViewUpdate::SuggestionsClosed);
        self.publish(mcq);
    }

    fn flush_transcript(&mut self) {
        if let Some(chunk) = self.transcript.flush() {
            debug!(code = %self.context.code, chars = chunk.len(), "sending transcript chunk");
            self.outlet
                .bus
                .emit(&Event::transcript_chunk(chunk.clone(), epoch_ms()));
            self.outlet.view(ViewUpdate::TranscriptSent(chunk));
        }
    }

    async fn end_session(&mut self) {
        self.flush_transcript();
        if self.machine.phase() != Phase::Terminal {
            self.outlet
                .view(ViewUpdate::Summary(self.machine.leaderboard().summary()));
        }
        let step = self.machine.end_session();
        self.outlet.dispatch(step);

        if let Some(api) = &self.api {
            match api.end_session(self.context.code.as_str()).await {
                Ok(results) => self.outlet.view(ViewUpdate::FinalResults(results)),
                Err(error) => warn!(code = %self.context.code, %error, "ending session on the backend failed"),
            }
        }
    }

    fn inbound(&mut self, event: &Event) {
        let now = epoch_ms();
        let raw = match event {
            Event::Round(round) => {
                let step = self.machine.handle_event(round, now);
                self.outlet.dispatch(step);
                return;
            }
            Event::Passthrough(raw) => raw,
        };

        if self.roster.apply(event, now) {
            self.outlet
                .view(ViewUpdate::Roster(self.roster.students().to_vec()));
        } else if let Some(options) = raw.view::<QuestionOptions>("question_options") {
            self.suggestions = Some(options.clone());
            self.outlet.view(ViewUpdate::Suggestions(options));
        } else if raw.view::<QuestionSelected>("question_selected").is_some() {
            if self.suggestions.take().is_some() {
                self.outlet.view(ViewUpdate::SuggestionsClosed);
            }
        } else if let Some(released) = raw.view::<NewQuestion>("new_question") {
            self.outlet.view(ViewUpdate::Released(released));
        } else if let Some(notice) = raw.view::<ErrorNotice>("error") {
            warn!(code = %self.context.code, message = %notice.message, "backend error");
            self.outlet.view(ViewUpdate::BackendError(notice.message));
        }
    }
}

fn flush_period(context: &SessionContext) -> Duration {
    context
        .config
        .transcription_interval()
        .max(Duration::from_secs(MIN_TRANSCRIPTION_INTERVAL_SECONDS))
}

async fn lecturer_loop(
    mut lecturer: Lecturer,
    mut commands: mpsc::UnboundedReceiver<LecturerCommand>,
    mut feed: Feed,
    mut alarms: mpsc::UnboundedReceiver<AlarmMessage>,
) {
    let period = flush_period(&lecturer.context);
    let mut flush = interval_at(Instant::now() + period, period);
    info!(code = %lecturer.context.code, "lecturer session started");

    while lecturer.machine.phase() != Phase::Terminal {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => lecturer.command(command).await,
                None => break,
            },
            Some(event) = feed.inbound.recv() => lecturer.inbound(&event),
            Some(alarm) = alarms.recv() => {
                let step = lecturer.machine.on_alarm(&alarm, epoch_ms());
                lecturer.outlet.dispatch(step);
            }
            _ = flush.tick() => lecturer.flush_transcript(),
        }
    }

    lecturer.flush_transcript();
    lecturer.machine.cancel_timers();
    drop(feed);
    info!(code = %lecturer.context.code, "lecturer session stopped");
}

/// Commands of a student session
#[derive(Debug, Clone, PartialEq, Eq)]
enum StudentCommand {
    Submit(String),
    Leave,
}

/// The greeting a student sends first on every connection
pub fn greeting(identity: &StudentIdentity) -> Event {
    Event::student_name(identity.nickname())
}

/// Handle of a running student session
#[derive(Debug)]
pub struct StudentSession {
    handle: Handle<StudentCommand>,
}

impl StudentSession {
    /// Joins the context's session as `identity`
    ///
    /// # Returns
    ///
    /// The handle and the receiver of view updates
    pub fn start(
        identity: StudentIdentity,
        context: SessionContext,
        feed: Feed,
    ) -> (Self, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (updates, update_rx) = mpsc::unbounded_channel();
        let (alarm_tx, alarms) = mpsc::unbounded_channel();

        let machine = RoundMachine::new(
            context.code.as_str(),
            Role::Student,
            TokioScheduler::new(alarm_tx),
        )
        .with_round_ms(context.config.round_ms());

        let student = Student {
            machine,
            outlet: Outlet {
                bus: context.bus.clone(),
                updates,
            },
            context,
            identity: Some(identity),
        };
        let task = tokio::spawn(student_loop(student, command_rx, feed, alarms));

        (
            Self {
                handle: spawn_handle(task, commands),
            },
            update_rx,
        )
    }

    /// Answers the active question with `option_id`
    ///
    /// A refused answer is reported as [`ViewUpdate::Rejected`].
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn submit(&self, option_id: impl Into<String>) -> Result<(), Error> {
        self.handle.send(StudentCommand::Submit(option_id.into()))
    }

    /// Leaves the session and forgets the identity
    ///
    /// # Errors
    ///
    /// `Error::Closed` when the session loop has stopped
    pub fn leave(&self) -> Result<(), Error> {
        self.handle.send(StudentCommand::Leave)
    }

    /// Waits for the session loop to stop
    pub async fn wait(mut self) {
        self.handle.wait().await;
    }
}

struct Student {
    machine: RoundMachine<TokioScheduler>,
    outlet: Outlet,
    context: SessionContext,
    identity: Option<StudentIdentity>,
}

impl Student {
    fn submit(&mut self, option_id: &str) {
        let Some(identity) = &self.identity else {
            return;
        };
        match self.machine.submit(identity.nickname(), option_id, epoch_ms()) {
            Ok(step) => self.outlet.dispatch(step),
            Err(error) => {
                debug!(code = %self.context.code, %error, "answer refused");
                self.outlet.view(ViewUpdate::Rejected(error.to_string()));
            }
        }
    }

    fn inbound(&mut self, event: &Event) {
        let raw = match event {
            Event::Round(round) => {
                let step = self.machine.handle_event(round, epoch_ms());
                self.outlet.dispatch(step);
                return;
            }
            Event::Passthrough(raw) => raw,
        };

        if let Some(feedback) = raw.view::<AnswerResult>("answer_result") {
            self.outlet.view(ViewUpdate::Feedback(feedback));
        } else if let Some(released) = raw.view::<NewQuestion>("new_question") {
            self.outlet.view(ViewUpdate::Released(released));
        } else if let Some(notice) = raw.view::<ErrorNotice>("error") {
            warn!(code = %self.context.code, message = %notice.message, "backend error");
            self.outlet.view(ViewUpdate::BackendError(notice.message));
        }
    }
}

async fn student_loop(
    mut student: Student,
    mut commands: mpsc::UnboundedReceiver<StudentCommand>,
    mut feed: Feed,
    mut alarms: mpsc::UnboundedReceiver<AlarmMessage>,
) {
    info!(code = %student.context.code, "student session started");

    while student.machine.phase() != Phase::Terminal {
        tokio::select! {
            command = commands.recv() => match command {
                Some(StudentCommand::Submit(option_id)) => student.submit(&option_id),
                Some(StudentCommand::Leave) | None => break,
            },
            Some(event) = feed.inbound.recv() => student.inbound(&event),
            Some(alarm) = alarms.recv() => {
                let step = student.machine.on_alarm(&alarm, epoch_ms());
                student.outlet.dispatch(step);
            }
        }
    }

    student.identity = None;
    student.machine.cancel_timers();
    drop(feed);
    info!(code = %student.context.code, "student session stopped");
}
