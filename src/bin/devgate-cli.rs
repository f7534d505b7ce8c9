use clap::Parser;
use devgate::cli::{Cli, exit_code, logging_config, run};
use devgate::config::Config;
use devgate::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = Config::load_from(cli.config.as_deref()).and_then(|c| c.validate().map(|_| c));
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(exit_code(&e) as u8);
        }
    };

    if let Err(e) = init_logging(&logging_config(&config, cli.verbose)) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(&cli, &config) {
        Ok(report) => {
            println!("{}", report.render(cli.json));
            if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            if cli.json {
                let body = serde_json::json!({
                    "error": e.category().as_str(),
                    "kind": e.kind(),
                    "message": e.to_string(),
                });
                println!("{}", body);
            } else {
                eprintln!("error: {}", e);
            }
            ExitCode::from(exit_code(&e) as u8)
        }
    }
}
