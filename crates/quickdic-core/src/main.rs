#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use quickdic_core::{dispatch_command, resolve_root, Cli, OutputFormat};
use serde_json::{json, Value};

fn main() {
    let cli = Cli::parse();
    let format = if cli.json {
        OutputFormat::Json
    } else {
        cli.output_format
    };
    let root = resolve_root(cli.root.clone());

    let logging = quickdic_logging::fs::read_config(&root);
    if logging.enabled {
        quickdic_logging::init_console(&logging.level);
    }

    if let Err(err) = run(&root, cli, format) {
        emit_error(format, &err);
        std::process::exit(1);
    }
}

fn run(root: &std::path::Path, cli: Cli, output_format: OutputFormat) -> Result<()> {
    let (message, data) = dispatch_command(root, cli.command)?;
    emit_payload(output_format, "ok", message, data)
}

fn emit_error(format: OutputFormat, err: &anyhow::Error) {
    let details: Vec<String> = err.chain().map(|cause| cause.to_string()).collect();
    let payload = json!({
        "status": "error",
        "message": err.to_string(),
        "details": details,
        "data": Value::Null,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            eprintln!("Error: {}", err);
            for detail in details.iter().skip(1) {
                eprintln!("  -> {}", detail);
            }
        }
    }
}

fn emit_payload(format: OutputFormat, status: &str, message: String, data: Value) -> Result<()> {
    let payload = json!({
        "status": status,
        "message": message,
        "data": data,
    });

    match format {
        OutputFormat::Json => println!("{}", payload),
        OutputFormat::Text => {
            println!("{}", payload["message"].as_str().unwrap_or_default());
            if !payload["data"].is_null() {
                let pretty = serde_json::to_string_pretty(&payload["data"])?;
                println!("{pretty}");
            }
        }
    }
    Ok(())
}
