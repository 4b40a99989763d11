use clap::Parser;

use kelpie::{Config, ModuleConfig, Runtime};

#[derive(Parser)]
#[command(author, version, about = "Run a WebAssembly module", long_about = None)]
struct Args {
    /// Input .wasm file path
    input: String,

    /// Exported function to invoke
    #[clap(long)]
    invoke: Option<String>,

    /// Arguments for the invoked function, as u64 slots
    args: Vec<u64>,

    /// Comma-separated list of things to dump: exports
    #[clap(long)]
    dump: Option<String>,

    /// Guest stack size in KiB
    #[clap(long, default_value_t = 512)]
    stack_kib: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let bytes = match std::fs::read(&args.input) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("[ERROR] failed to read {}: {error}", args.input);
            std::process::exit(1);
        }
    };

    let runtime = Runtime::new(Config::default().guest_stack_size(args.stack_kib * 1024));
    let compiled = match runtime.compile(&bytes) {
        Ok(compiled) => compiled,
        Err(error) => {
            eprintln!("[ERROR] compile: {error}");
            std::process::exit(1);
        }
    };

    if args.dump.as_deref() == Some("exports") {
        for (name, kind) in compiled.exports() {
            println!("{name}: {kind:?}");
        }
        return;
    }

    let instance = match runtime.instantiate(&compiled, ModuleConfig::default()) {
        Ok(instance) => instance,
        Err(error) => {
            eprintln!("[ERROR] instantiate: {error}");
            std::process::exit(1);
        }
    };

    let Some(name) = args.invoke else {
        println!("[OK] module instantiated; nothing to invoke");
        return;
    };
    let Some(function) = instance.exported_function(&name) else {
        eprintln!("[ERROR] no exported function {name:?}");
        std::process::exit(1);
    };

    match function.call(&args.args) {
        Ok(results) => {
            for (idx, result) in results.iter().enumerate() {
                println!("result[{idx}] = {result} ({result:#x})");
            }
        }
        Err(error) => {
            eprintln!("[ERROR] call: {error}");
            std::process::exit(1);
        }
    }
}
