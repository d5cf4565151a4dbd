use std::io::Write as _;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use shellpilot::api::ChatClient;
use shellpilot::config::{load_config, AppConfig};
use shellpilot::observability::init_tracing;
use shellpilot::proc::ProcessRegistry;
use shellpilot::session::{ConsoleSink, Session};
use shellpilot::tools::Dispatcher;

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = build_runtime(&config);

    runtime.block_on(async move {
        run(config).await;
    });
}

fn build_runtime(config: &AppConfig) -> tokio::runtime::Runtime {
    // One worker thread is the default: the client is cooperative
    // single-threaded, with child-process I/O delivered as events.
    let worker_threads = config.runtime.worker_threads.unwrap_or(1);
    let mut builder = if worker_threads == 1 {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.worker_threads(worker_threads);
        builder
    };
    builder.enable_io();
    builder.enable_time();
    builder.build().unwrap_or_else(|e| {
        eprintln!("Failed to initialize Tokio runtime: {e}");
        std::process::exit(1);
    })
}

async fn run(config: AppConfig) {
    let client = ChatClient::new(&config.api).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });
    // The registry outlives every conversation turn; /clear never touches it.
    let registry = Arc::new(ProcessRegistry::new(&config.features.shell));
    let workdir = std::env::current_dir().unwrap_or_else(|e| {
        eprintln!("Failed to resolve working directory: {e}");
        std::process::exit(1);
    });
    let dispatcher = Dispatcher::new(
        Arc::clone(&registry),
        workdir,
        config.features.max_output_bytes,
    );
    let mut session = Session::new(client, dispatcher, config.features.max_tool_turns);
    let mut sink = ConsoleSink::default();

    tracing::info!(model = %config.api.model, "shellpilot ready");
    println!("shellpilot — chatting with {} (/help for commands)", config.api.model);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("stdin error: {e}");
                break;
            }
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/help" => {
                println!(
                    "/quit            exit\n\
                     /clear           reset conversation history\n\
                     /ps              list background terminals\n\
                     /dispose <id>    drop a completed background terminal"
                );
                continue;
            }
            "/clear" => {
                session.clear_history();
                println!("History cleared. Background terminals keep running.");
                continue;
            }
            "/ps" => {
                let entries = registry.list();
                if entries.is_empty() {
                    println!("No background terminals.");
                } else {
                    for entry in entries {
                        println!("{entry}");
                    }
                }
                continue;
            }
            _ => {}
        }
        if let Some(raw_id) = input.strip_prefix("/dispose ") {
            match raw_id.trim().parse::<u64>() {
                Ok(id) if registry.dispose(id) => println!("Disposed terminal {id}."),
                Ok(id) => println!("Terminal {id} is unknown or still running."),
                Err(_) => println!("Usage: /dispose <id>"),
            }
            continue;
        }

        if let Err(e) = session.run_user_turn(input, &mut sink).await {
            eprintln!("\n{e}");
            if e.is_fatal() {
                break;
            }
        }
        println!();
    }
}

fn prompt() {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(b"> ");
    let _ = stdout.flush();
}
