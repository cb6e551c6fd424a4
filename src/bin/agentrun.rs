use agentrun::api::ApiClient;
use agentrun::config::Config;
use agentrun::logging::init_tracing;
use agentrun::runtime::{RunSession, StreamUpdate};
use agentrun::types::{Approval, ApprovalDecision, EventPayload, RunStatus};
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

const MAX_RECONNECTS: usize = 3;
const USAGE: &str = "usage: agentrun <message...> | agentrun --run <run-id>";

type StdinLines = Lines<BufReader<Stdin>>;

#[derive(Debug, PartialEq, Eq)]
enum Target {
    Start(String),
    Open(String),
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Target> {
    let mut args = args.into_iter();
    let mut words = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--run" => {
                let Some(run_id) = args.next().filter(|id| !id.trim().is_empty()) else {
                    bail!("--run needs a run id\n{USAGE}");
                };
                return Ok(Target::Open(run_id));
            }
            "-h" | "--help" => bail!(USAGE),
            _ => words.push(arg),
        }
    }

    let message = words.join(" ");
    if message.trim().is_empty() {
        bail!(USAGE);
    }
    Ok(Target::Start(message))
}

#[derive(Default)]
struct Printer {
    mid_stream: bool,
}

impl Printer {
    fn print(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::LlmDelta { delta } => {
                print!("{delta}");
                let _ = std::io::stdout().flush();
                self.mid_stream = true;
            }
            EventPayload::MessageAssistantCreated { content, .. } => {
                if self.mid_stream {
                    println!();
                } else {
                    println!("{content}");
                }
                self.mid_stream = false;
            }
            EventPayload::ToolCallRequested {
                tool_name,
                args,
                risk_tier,
                ..
            } => {
                self.end_line();
                println!("[tool] {tool_name} ({risk_tier:?}) {args}");
            }
            EventPayload::ToolCallCompleted {
                id,
                is_success,
                error,
                ..
            } => {
                self.end_line();
                match (is_success, error) {
                    (true, _) => println!("[tool] {id} completed"),
                    (false, Some(error)) => println!("[tool] {id} failed: {error}"),
                    (false, None) => println!("[tool] {id} failed"),
                }
            }
            EventPayload::RunCompleted => {
                self.end_line();
                println!("[run completed]");
            }
            EventPayload::RunCancelled => {
                self.end_line();
                println!("[run cancelled]");
            }
            EventPayload::RunFailed { error } => {
                self.end_line();
                eprintln!("[run failed] {error}");
            }
            _ => {}
        }
    }

    fn end_line(&mut self) {
        if self.mid_stream {
            println!();
            self.mid_stream = false;
        }
    }
}

async fn read_line(stdin: &mut StdinLines, prompt: &str) -> Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    Ok(stdin
        .next_line()
        .await
        .context("Failed to read from stdin")?
        .map(|line| line.trim().to_string()))
}

async fn prompt_approval(
    session: &RunSession,
    approval: &Approval,
    stdin: &mut StdinLines,
) -> Result<bool> {
    println!(
        "[approval] {} wants to run {} ({:?} risk) with {}",
        approval.id, approval.tool_name, approval.risk_tier, approval.original_args
    );

    loop {
        let Some(answer) = read_line(stdin, "approve? [y]es / [n]o / [e]dit: ").await? else {
            return Ok(false);
        };
        let Some(decision) = ApprovalDecision::parse(&answer) else {
            continue;
        };

        let (edited, reason) = match decision {
            ApprovalDecision::EditedAndApproved => {
                let Some(raw) = read_line(stdin, "edited arguments (JSON): ").await? else {
                    return Ok(false);
                };
                match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(value) => (Some(value), None),
                    Err(error) => {
                        eprintln!("invalid JSON: {error}");
                        continue;
                    }
                }
            }
            ApprovalDecision::Rejected => {
                let reason = read_line(stdin, "reason (optional): ")
                    .await?
                    .filter(|reason| !reason.is_empty());
                (None, reason)
            }
            ApprovalDecision::Approved => (None, None),
        };

        match session
            .resolve_approval(&approval.id, decision, edited, reason)
            .await
        {
            Ok(outcome) => {
                tracing::debug!(approval_id = %approval.id, ?outcome, "approval submitted");
                return Ok(true);
            }
            Err(error) => {
                eprintln!("[error] {error}");
                return Ok(false);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let config = Config::load()?;
    config.validate()?;
    let target = parse_args(std::env::args().skip(1))?;

    let backend = Arc::new(ApiClient::new(&config)?);
    let mut session = RunSession::new(backend, config.assistant_type.clone());
    let mut updates = session.observe();

    match &target {
        Target::Start(message) => {
            let run_id = session.start(message).await?;
            println!("[run {run_id}]");
        }
        Target::Open(run_id) => {
            session.open(run_id).await?;
            if let Some(run) = session.snapshot().run {
                for message in &run.messages {
                    println!("{:?}: {}", message.role, message.content);
                }
            }
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut printer = Printer::default();
    let mut prompted: HashSet<String> = HashSet::new();
    let mut reconnects = 0;
    let mut input_sent = false;

    loop {
        let state = session.snapshot();
        let status = state.run.as_ref().map(|run| run.status);

        for approval in &state.pending_approvals {
            if prompted.insert(approval.id.clone())
                && !prompt_approval(&session, approval, &mut stdin).await?
            {
                prompted.remove(&approval.id);
            }
        }

        if status != Some(RunStatus::WaitingInput) {
            input_sent = false;
        }
        match status {
            Some(status) if status.is_terminal() => break,
            Some(RunStatus::WaitingInput) if !input_sent => {
                printer.end_line();
                let Some(message) = read_line(&mut stdin, "> ").await? else {
                    break;
                };
                if message.is_empty() {
                    break;
                }
                if let Err(error) = session.send_message(&message).await {
                    eprintln!("[error] {error}");
                    break;
                }
                input_sent = true;
            }
            _ => {}
        }

        let Some(update) = updates.recv().await else {
            break;
        };
        match update {
            StreamUpdate::Event(event) => printer.print(&event.payload),
            StreamUpdate::Error(_) | StreamUpdate::Ended => {
                let finished = session
                    .snapshot()
                    .run
                    .is_some_and(|run| run.status.is_terminal());
                if finished {
                    break;
                }
                if reconnects == MAX_RECONNECTS {
                    bail!("event feed lost after {MAX_RECONNECTS} reconnect attempts");
                }
                reconnects += 1;
                tracing::info!(attempt = reconnects, "reconnecting to run events");
                session.reconnect().await?;
            }
        }
    }

    printer.end_line();
    if let Some(error) = session.snapshot().error {
        eprintln!("[error] {error}");
    }
    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_message_words_are_joined() {
        assert_eq!(
            parse_args(args(&["list", "open", "invoices"])).unwrap(),
            Target::Start("list open invoices".to_string())
        );
    }

    #[test]
    fn test_run_flag_opens_existing_run() {
        assert_eq!(
            parse_args(args(&["--run", "run_42"])).unwrap(),
            Target::Open("run_42".to_string())
        );
    }

    #[test]
    fn test_missing_input_is_rejected() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["--run"])).is_err());
        assert!(parse_args(args(&["  "])).is_err());
    }
}
