//! Runs one Qwiz round without a backend
//!
//! A lecturer and two students share an in-process bus. The lecturer
//! publishes the sample question, both students answer, and the session
//! ends once the round has been scored.

use std::error::Error;

use qwiz::{
    bus::Bus,
    config::{ClientConfig, SessionConfig},
    context::{SessionContext, StudentIdentity},
    driver::{Feed, LecturerSession, StudentSession, ViewUpdate},
    mcq::sample_drafts,
    round::Update,
    session::Role,
    session_code::SessionCode,
};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

async fn round_ended(updates: &mut mpsc::UnboundedReceiver<ViewUpdate>) -> Option<ViewUpdate> {
    while let Some(update) = updates.recv().await {
        if matches!(update, ViewUpdate::Round(Update::Ended(_))) {
            return Some(update);
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = ClientConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.rust_log))
        .init();

    let code = SessionCode::generate();
    let session_config = SessionConfig {
        answer_time_seconds: 20,
        ..SessionConfig::default()
    };
    let bus = Bus::new();
    let context = |role| {
        SessionContext::new(code.clone(), role)
            .with_config(session_config.clone())
            .with_bus(bus.clone())
    };
    info!(%code, "demo session created");

    let (lecturer, mut lecturer_updates) =
        LecturerSession::start(context(Role::Lecturer), Feed::local(&bus), None);

    let mut students = Vec::new();
    for (nickname, option) in [("Ava", "a"), ("Leo", "b")] {
        let identity = StudentIdentity::join(code.as_str(), nickname)?;
        let (student, updates) =
            StudentSession::start(identity, context(Role::Student), Feed::local(&bus));
        students.push((student, updates, option));
    }

    lecturer.publish(sample_drafts().remove(0))?;
    for (student, updates, option) in &mut students {
        while let Some(update) = updates.recv().await {
            if matches!(update, ViewUpdate::Round(Update::Published(_))) {
                break;
            }
        }
        student.submit(*option)?;
    }

    if let Some(ViewUpdate::Round(Update::Ended(results))) =
        round_ended(&mut lecturer_updates).await
    {
        println!("correct option: {}", results.correct_option_id);
        for count in &results.counts {
            println!("  {}: {}", count.option_id, count.count);
        }
        for (position, row) in results.top.iter().enumerate() {
            println!("{}. {} ({} pts)", position + 1, row.name, row.score);
        }
    }

    lecturer.end_session()?;
    lecturer.wait().await;
    for (student, _, _) in students {
        student.wait().await;
    }
    info!(%code, "demo session finished");

    Ok(())
}
