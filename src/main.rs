use quiz_engine::clock::{Clock, SystemClock};
use quiz_engine::config::QuizConfig;
use quiz_engine::error::QuizError;
use quiz_engine::history::HistorySubmission;
use quiz_engine::machine::{Outcome, QuizMachine, QuizState};
use quiz_engine::models::{validate_questions, QuizFilter, QuizQuestion};
use quiz_engine::timer::QuizRunner;
use quiz_engine::{build_machine, build_storage, build_store};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: quiz_engine [questions.json] [--keep-order]";

#[derive(Debug, Deserialize)]
struct QuestionFile {
    #[serde(default)]
    filter: QuizFilter,
    questions: Vec<QuizQuestion>,
}

fn print_current(machine: &QuizMachine) {
    let (Some(progress), Some(question)) = (machine.progress(), machine.current_question()) else {
        return;
    };
    println!(
        "\nQuestion {}/{} ({:?}, {}s)",
        progress.current_question_index + 1,
        progress.total_questions,
        question.difficulty,
        machine.time_remaining()
    );
    println!("{}", question.question);
    for (i, option) in question.display_options().iter().enumerate() {
        println!("  {}. {}", i + 1, option);
    }
    if let Some(hint) = &question.hint {
        println!("  hint: {}", hint);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let mut path = None;
    let mut keep_order = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--keep-order" => keep_order = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            other => path = Some(other.to_string()),
        }
    }

    let config = QuizConfig::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&config);
    let storage = build_storage(&config, store.clone(), clock.clone());

    let questions = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let file: QuestionFile = serde_json::from_str(&raw)?;
            if let Err(issues) = validate_questions(&file.questions) {
                for issue in &issues {
                    eprintln!("{}: {}", issue.field, issue.issue);
                }
                return Err(QuizError::Validation(issues).into());
            }
            storage.store_quiz_data(&file.filter, &file.questions, !keep_order)?
        }
        None => match storage.get_quiz_data() {
            Some(data) => {
                info!("resuming stored quiz session with {} questions", data.questions.len());
                data.questions
            }
            None => anyhow::bail!("no active quiz session; {}", USAGE),
        },
    };

    let machine = Arc::new(Mutex::new(build_machine(&config, store.as_ref(), clock.clone())));
    {
        let mut m = machine.lock().await;
        m.initialize_quiz(questions);
        if m.awaiting_start() {
            m.start_quiz();
        } else if m.current_answer().is_some() && !m.has_pending_advance() {
            m.next_question();
        }
        m.snapshot().save(store.as_ref())?;
        print_current(&m);
    }

    let mut runner = QuizRunner::new(machine.clone(), config.tick_interval);
    let mut events = runner.subscribe();
    runner.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = machine.lock().await.progress().map(|p| p.current_question_index);

    while machine.lock().await.state() != QuizState::Completed {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if event.outcome == Outcome::TimedOut {
                    println!("time is up");
                }
                if event.outcome == Outcome::Applied && event.question_index == shown {
                    continue;
                }
                let m = machine.lock().await;
                m.snapshot().save(store.as_ref())?;
                if event.question_index != shown && event.state != QuizState::Completed {
                    shown = event.question_index;
                    print_current(&m);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let mut m = machine.lock().await;
                let Some(question) = m.current_question().cloned() else { continue };
                let options = question.display_options();
                let choice = match line.trim().parse::<usize>() {
                    Ok(n) if (1..=options.len()).contains(&n) => options[n - 1].clone(),
                    _ => {
                        println!("enter a number between 1 and {}", options.len());
                        continue;
                    }
                };
                match m.answer_question(&choice) {
                    Outcome::Applied => {
                        if question.is_correct(&choice) {
                            println!("correct");
                        } else {
                            println!("wrong, the answer is: {}", question.correct_answer);
                        }
                        m.next_question();
                    }
                    other => println!("answer not recorded ({:?})", other),
                }
                m.snapshot().save(store.as_ref())?;
                let index = m.progress().map(|p| p.current_question_index);
                if index != shown && m.state() != QuizState::Completed {
                    shown = index;
                    print_current(&m);
                }
            }
        }
    }
    runner.stop();

    let mut m = machine.lock().await;
    let Some(submission) = m.progress().and_then(HistorySubmission::from_progress) else {
        info!("quiz left unfinished, progress kept for resume");
        return Ok(());
    };
    println!(
        "\nScore: {}% ({} correct, {} wrong) in {}s",
        submission.score,
        submission.correct.len(),
        submission.wrong.len(),
        submission.total_time
    );
    println!("{}", serde_json::to_string_pretty(&submission)?);
    m.reset_quiz(&storage);
    Ok(())
}
