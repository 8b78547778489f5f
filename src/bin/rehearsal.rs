//! Scripted end-to-end rehearsal run.
//!
//! Walks a complete exam against the scripted providers: no microphone,
//! speaker or API key needed. Doubles as a smoke test and as a
//! reference for wiring the engine into a host.

use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;
use viva::assessment::scripted::ScriptedAssessment;
use viva::events::event_stream;
use viva::speech::scripted::{ScriptedCapture, ScriptedPlayback};
use viva::{ExamConfig, ExamEngine, ExamKind, SessionEvent, SessionState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Engine logs at info by default; override with RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("viva=info")),
        )
        .init();

    let kind = match std::env::args().nth(1).as_deref() {
        None | Some("mock") => ExamKind::MockExam,
        Some("topic") => ExamKind::TopicPractice,
        Some(other) => {
            anyhow::bail!("unknown exam kind {other:?}; expected \"mock\" or \"topic\"")
        }
    };
    let (examiner_lines, candidate_lines) = scripts_for(kind);

    let service = Arc::new(ScriptedAssessment::new(&examiner_lines).with_points(2));
    let capture = Arc::new(ScriptedCapture::new(&candidate_lines));
    let playback = Arc::new(ScriptedPlayback::new());

    let controls = ExamEngine::new(ExamConfig::default(), service, capture, playback).spawn();
    let mut events = event_stream(controls.subscribe());

    println!(
        "viva rehearsal v{} ({})\n",
        env!("CARGO_PKG_VERSION"),
        kind.label()
    );
    controls.start(kind).await?;

    while let Some(event) = events.next().await {
        // A lagged receiver only means missed events; keep reading.
        let Ok(event) = event else { continue };
        match event {
            SessionEvent::TurnRecorded { turn } => {
                println!("{:>9}: {}", turn.speaker.label(), turn.text);
            }
            SessionEvent::PhaseChanged { phase } => {
                println!("\n=== {} ===\n", phase.label());
            }
            SessionEvent::FeedbackReceived { feedback } => {
                println!("{:>9}  ({})", "", feedback.comment);
            }
            SessionEvent::ArtifactReady { artifact } => {
                println!("{:>9}  [picture: {}]", "", artifact.location);
            }
            SessionEvent::StateChanged {
                state: SessionState::Finalizing,
            } => {
                println!("\nscoring your answers...");
            }
            SessionEvent::ResultReady { result } => {
                println!("\noverall score: {}/100", result.summary.overall_score);
                for strength in &result.summary.strengths {
                    println!("  + {strength}");
                }
                for area in &result.summary.areas_for_improvement {
                    println!("  - {area}");
                }
                println!("\n{}", result.analysis.analysis);
                if result.degraded {
                    println!("(some scoring components were unavailable)");
                }
                break;
            }
            _ => {}
        }
    }

    controls.back_to_dashboard().await?;
    Ok(())
}

/// Canned examiner and candidate scripts for each exam format. The
/// examiner lines carry the trigger wording the phase detector keys on.
fn scripts_for(kind: ExamKind) -> (Vec<&'static str>, Vec<&'static str>) {
    match kind {
        ExamKind::MockExam => (
            vec![
                "Good morning. My name is Alex and I will be your examiner today. \
                 Could you tell me your full name?",
                "Thank you, Ana. Now we are going to look at a picture. \
                 Please describe what you see in as much detail as you can.",
                "Interesting. Now let's talk about something else. \
                 How do you usually spend your weekends?",
                "I see. Next, I am going to ask you for some directions. \
                 How do I get from the town hall to the railway station?",
            ],
            vec![
                "My name is Ana Martín.",
                "I can see a busy market square with fruit stalls and a fountain in the middle.",
                "On weekends I like to hike in the hills near my town with my sister.",
                "You go straight ahead, cross the bridge, and the station is on your left.",
            ],
        ),
        ExamKind::TopicPractice => (
            vec![
                "Hello. Today we will practise one topic. Tell me about your favourite meal.",
                "That sounds delicious. Now let's have a conversation about it. \
                 Would you cook that meal for a guest?",
            ],
            vec![
                "My favourite meal is lentil stew, the way my grandmother cooks it.",
                "Of course, although mine is never quite as good as hers.",
            ],
        ),
    }
}
