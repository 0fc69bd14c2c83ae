use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pki_monitor::config::{CliOverrides, Config};
use pki_monitor::metrics::prom::prometheus_metrics;
use pki_monitor::report::{family_lines, summary_json, summary_table};
use pki_monitor::{Family, Ledger, Monitor, MonitorError, OutputFormat, Summary};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pki-monitor",
    version,
    about = "PKI site health check: documents, certificates, CRLs, OCSP and LDAP",
    long_about = None
)]
struct Cli {
    /// Configuration file (default: pki-monitor.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory to store downloaded artifacts (default: ./artifacts)
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// CSV ledger file for results (default: ./results.csv)
    #[arg(long)]
    log: Option<PathBuf>,

    /// Show the summary of the existing ledger without running new checks
    #[arg(long)]
    summary_only: bool,

    /// Number of most recent ledger lines to show
    #[arg(long, default_value_t = 20)]
    lines: usize,

    /// Only run these families, comma separated: pdf,crt,crl,ocsp,ldap
    #[arg(long, value_delimiter = ',')]
    only: Vec<Family>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    output: OutputFormat,

    /// Push summary gauges to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pki_monitor=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.example_config {
        println!("{}", Config::example_toml());
        return ExitCode::SUCCESS;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "aborting");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), MonitorError> {
    let config = Config::load(cli.config.as_deref())?.merge_cli(CliOverrides {
        artifacts_dir: cli.artifacts,
        ledger_path: cli.log,
        prometheus: cli.prometheus.then_some(true),
        prometheus_address: cli.prometheus_address,
    });

    if cli.summary_only {
        let ledger = Ledger::existing(&config.ledger_path)
            .ok_or_else(|| MonitorError::MissingLedger(config.ledger_path.clone()))?;
        let records = ledger.read_all().map_err(|source| MonitorError::Setup {
            path: config.ledger_path.clone(),
            source,
        })?;
        print_summary(&Summary::from_records(&records), cli.output);
        print_tail(&ledger, cli.lines, cli.output);
        return Ok(());
    }

    let prometheus = config.prometheus.clone();
    let monitor = Monitor::new(config)?;
    let report = monitor.run(&cli.only)?;
    print_summary(&report.summary, cli.output);
    print_tail(monitor.ledger(), cli.lines, cli.output);

    if prometheus.enabled {
        if let Err(e) = prometheus_metrics(&report.summary, &prometheus.address) {
            tracing::warn!(error = %e, address = %prometheus.address, "failed to push metrics");
        }
    }
    Ok(())
}

fn print_summary(summary: &Summary, output: OutputFormat) {
    match output {
        OutputFormat::Json => match summary_json(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "failed to serialize summary"),
        },
        OutputFormat::Text => {
            println!();
            println!("Results summary:");
            println!("{}", summary_table(summary));
            for line in family_lines(summary) {
                println!("{}", line);
            }
        }
    }
}

fn print_tail(ledger: &Ledger, lines: usize, output: OutputFormat) {
    if output == OutputFormat::Json || lines == 0 {
        return;
    }
    match ledger.tail(lines) {
        Ok(tail) => {
            println!();
            println!("Last {} lines of {}:", lines, ledger.path().display());
            println!("----------------------------------------");
            for line in tail {
                println!("{}", line);
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to read ledger"),
    }
}
