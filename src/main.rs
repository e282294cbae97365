//! udf - drive a UDF module from the command line.
//!
//! Run `udf --help` for usage information.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use udf_gateway::config::{GatewayConfig, Preopen};
use udf_gateway::msgpack::{self, Value};
use udf_gateway::sandbox::WasmtimeSandbox;
use udf_gateway::Gateway;

#[derive(Parser)]
#[command(name = "udf", about = "Load a UDF module and call into its script engine", version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// UDF module to load (overrides the config file)
    #[arg(short, long, global = true)]
    module: Option<PathBuf>,

    /// Preopen a host directory as HOST:GUEST (repeatable)
    #[arg(long = "dir", value_name = "HOST:GUEST", global = true)]
    dirs: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Define `foo`, call it, and call `main.sqrt`
    Smoke,

    /// Evaluate a script
    Exec {
        /// Script source
        script: String,
    },

    /// Call a function with JSON arguments
    Call {
        /// Dotted path of the function, e.g. `main.sqrt`
        target: String,

        /// Arguments as a JSON array
        #[arg(default_value = "[]")]
        args: String,

        /// Script to evaluate before the call (repeatable)
        #[arg(long)]
        prelude: Vec<String>,
    },

    /// Encode a JSON value as MessagePack hex
    Pack {
        json: String,
    },

    /// Decode MessagePack hex into JSON
    Unpack {
        hex: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match &cli.command {
        Commands::Smoke => smoke(&mut open(&cli)?),
        Commands::Exec { script } => {
            let mut gw = open(&cli)?;
            gw.execute(script)?;
            println!("ok");
            Ok(())
        }
        Commands::Call { target, args, prelude } => {
            let args = parse_json(args)?;
            if !matches!(args, Value::Array(_)) {
                bail!("call arguments must be a JSON array");
            }
            let mut gw = open(&cli)?;
            for script in prelude {
                gw.execute(script).with_context(|| format!("prelude {script:?}"))?;
            }
            let out = gw.call(target, &msgpack::encode(&args)?)?;
            print_value(&msgpack::decode(&out)?);
            Ok(())
        }
        Commands::Pack { json } => {
            println!("{}", hex::encode(msgpack::encode(&parse_json(json)?)?));
            Ok(())
        }
        Commands::Unpack { hex: encoded } => {
            let bytes = hex::decode(encoded.trim()).context("invalid hex")?;
            print_value(&msgpack::decode(&bytes)?);
            Ok(())
        }
    }
}

/// Loads and initializes the module.
fn open(cli: &Cli) -> Result<Gateway<WasmtimeSandbox>> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(module) = &cli.module {
        config.module = Some(module.clone());
    }
    for dir in &cli.dirs {
        let preopen = Preopen::parse(dir).with_context(|| format!("invalid --dir {dir:?}, expected HOST:GUEST"))?;
        config.wasi.preopens.push(preopen);
    }

    let mut gw = Gateway::open(&config).context("failed to load UDF module")?;
    gw.initialize()?;
    Ok(gw)
}

/// Replays the reference session: define `foo`, call it, then `main.sqrt`.
fn smoke(gw: &mut Gateway<WasmtimeSandbox>) -> Result<()> {
    let result = gw.execute(r#"globalThis.foo = function(x) { print("Calling foo with " + x + "."); return x; };"#);
    println!("Result of exec: {}", if result.is_ok() { 0 } else { -1 });
    result?;

    let out = gw.call("foo", &msgpack::encode_args(&[Value::from("hello")])?)?;
    println!("Result of foo(\"hello\"): {}", hex::encode(&out));
    println!("Unpacked result of foo(\"hello\"): {}", msgpack::decode(&out)?);

    let out = gw.call("main.sqrt", &msgpack::encode_args(&[Value::from(2)])?)?;
    println!("Result of main.sqrt(2): {}", hex::encode(&out));
    println!("Unpacked result of main.sqrt(2): {}", msgpack::decode(&out)?);
    Ok(())
}

fn parse_json(text: &str) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_str(text).with_context(|| format!("invalid JSON: {text}"))?;
    Ok(Value::from(json))
}

/// Prints as JSON where possible, else in MessagePack display form.
fn print_value(value: &Value) {
    match serde_json::Value::try_from(value) {
        Ok(json) => println!("{json}"),
        Err(_) => println!("{value}"),
    }
}
