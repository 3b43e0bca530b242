use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, CommandFactory, Parser as ClapParser};
use tracing_subscriber::EnvFilter;

use wirebatch::{
    BatchEngine, BatchRequest, DispatchError, EngineConfig, ParserConfig, RequestDescriptor,
    SubResponse, decompose, format_debug, format_headers_only, format_json, format_response,
};

/// WireBatch CLI — decompose or execute a batch request.
///
/// Reads a batch body (multipart/mixed or JSON) from a file, --raw string, or
/// stdin. By default the decomposed sub-requests are printed; with --execute
/// the batch runs against a built-in echo dispatcher and the assembled
/// response is printed.
///
/// Escape sequences (\r, \n, \t, \\) in the --raw value are interpreted so
/// you can pass a full batch body as a single shell argument.
#[derive(ClapParser)]
#[command(name = "wirebatch-cli", version, about, long_about = None)]
struct Cli {
    /// Path to a file containing the batch body.
    /// Reads from stdin when neither FILE nor --raw is given.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Raw batch body (escape sequences \r \n \t \\ are expanded).
    #[arg(long)]
    raw: Option<String>,

    /// Content-Type of the batch, e.g. "multipart/mixed; boundary=b".
    #[arg(short, long)]
    content_type: String,

    /// Prefer header, e.g. "odata.continue-on-error".
    #[arg(long)]
    prefer: Option<String>,

    /// Dispatch the sub-requests and print the assembled response.
    #[arg(short, long)]
    execute: bool,

    /// Output format for decomposed sub-requests.
    #[arg(short, long, default_value = "json", value_enum)]
    format: OutputFormat,

    /// Pretty-print JSON output (ignored for other formats).
    #[arg(short, long)]
    pretty: bool,

    /// Maximum allowed body size of each sub-request in bytes.
    #[arg(long, default_value = "10485760")]
    max_body_size: usize,

    /// Maximum number of headers allowed per sub-request.
    #[arg(long, default_value = "128")]
    max_headers: usize,

    /// Maximum number of sub-requests in the batch.
    #[arg(long, default_value = "1000")]
    max_parts: usize,

    /// Run multipart batches nested inside a multipart part.
    #[arg(long)]
    allow_nested: bool,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable debug output
    Debug,
    /// Request-line + headers only
    Headers,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // When no input source is provided and stdin is a terminal (not piped),
    // show help instead of blocking.
    if cli.file.is_none() && cli.raw.is_none() && std::io::stdin().is_terminal() {
        Cli::command().print_help().ok();
        println!();
        process::exit(0);
    }

    let data = match read_input(&cli) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error reading input: {e}");
            process::exit(1);
        }
    };

    let config = EngineConfig {
        parser: ParserConfig {
            max_body_size: cli.max_body_size,
            max_headers_count: cli.max_headers,
            ..ParserConfig::default()
        },
        allow_nested_multipart: cli.allow_nested,
        max_parts: cli.max_parts,
    };

    let mut request =
        BatchRequest::new(data).with_header("Content-Type", cli.content_type.as_str());
    if let Some(prefer) = &cli.prefer {
        request = request.with_header("Prefer", prefer.as_str());
    }

    let result = if cli.execute {
        execute(request, config)
    } else {
        print_descriptors(&cli, &request, &config)
    };

    if let Err(e) = result {
        if e.is_header_failure() {
            eprintln!("Batch rejected ({}): {e}", e.status_code());
        } else {
            eprintln!("Batch error ({}): {e}", e.status_code());
        }
        process::exit(2);
    }
}

/// Install a stderr subscriber; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_descriptors(
    cli: &Cli,
    request: &BatchRequest,
    config: &EngineConfig,
) -> Result<(), wirebatch::BatchError> {
    let descriptors = decompose(request, config)?;
    let output = match cli.format {
        OutputFormat::Json => format_json(&descriptors, cli.pretty),
        OutputFormat::Debug => format_debug(&descriptors),
        OutputFormat::Headers => format_headers_only(&descriptors),
    };
    print!("{output}");
    Ok(())
}

fn execute(request: BatchRequest, config: EngineConfig) -> Result<(), wirebatch::BatchError> {
    let mut engine = BatchEngine::with_config(EchoDispatcher::default(), config);
    let response = engine.process(request)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write!(out, "{}", format_response(response.status, &response.headers, &[]))?;
    response.write_body_to(&mut out)?;
    writeln!(out)?;
    Ok(())
}

/// Answers every sub-request with its own descriptor as JSON.
///
/// `POST` requests "create" `<path>/<n>` and answer 201.
#[derive(Default)]
struct EchoDispatcher {
    created: usize,
}

impl wirebatch::Dispatcher for EchoDispatcher {
    fn dispatch(
        &mut self,
        request: &RequestDescriptor,
        _catch_errors: bool,
    ) -> Result<SubResponse, DispatchError> {
        let body = serde_json::to_vec(request).map_err(|e| DispatchError::new(e.to_string()))?;
        let response = SubResponse::new(200)
            .with_header("Content-Type", "application/json")
            .with_body(body);

        if request.method == wirebatch::HttpMethod::POST {
            self.created += 1;
            let location = format!("{}/{}", request.path_info.trim_end_matches('/'), self.created);
            let mut response = response
                .with_header("Location", location.as_str())
                .with_created_resource(location);
            response.status = 201;
            return Ok(response);
        }
        Ok(response)
    }
}

/// Read the batch body from --raw, a file, or stdin.
fn read_input(cli: &Cli) -> Result<Vec<u8>, std::io::Error> {
    if let Some(raw) = &cli.raw {
        return Ok(unescape(raw).into_bytes());
    }
    match &cli.file {
        Some(path) => std::fs::read(path),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Expand C-style escape sequences (`\r`, `\n`, `\t`, `\\`) in a string.
///
/// Any other `\X` sequence is kept as-is (both the backslash and `X`).
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
