use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use swift_grb::{
    BurstAnalyserOptions, Client, DEFAULT_POLL_INTERVAL, JobHandle, JobKind, LightCurveOptions,
    ObsDataOptions, Objects, OutputOptions, PositionOptions, RebinRequest, SpectrumOptions,
    TimesliceRequest,
};

#[derive(Parser)]
#[command(name = "grbfetch", version, about = "Fetch Swift GRB data products")]
struct Cli {
    /// API endpoint (or env SWIFTGRB_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    insecure: bool,

    /// Attempts per HTTP request
    #[arg(long, global = true, default_value_t = 1)]
    retry_max: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Target {
    /// GRB name; repeat for several objects
    #[arg(long = "name")]
    names: Vec<String>,

    /// Swift target ID; repeat for several objects
    #[arg(long = "target-id")]
    target_ids: Vec<u64>,

    /// Treat a single object as a collection (keyed output and per-object paths)
    #[arg(long)]
    keyed: bool,
}

impl Target {
    fn objects(&self) -> Objects {
        let mut objects = Objects::default();
        match self.names.as_slice() {
            [] => {}
            [one] if !self.keyed => objects.grb_name = Objects::name(one.as_str()).grb_name,
            many => objects.grb_name = Objects::names(many.iter().cloned()).grb_name,
        }
        match self.target_ids.as_slice() {
            [] => {}
            [one] if !self.keyed => objects.target_id = Objects::target_id(*one).target_id,
            many => objects.target_id = Objects::target_ids(many.iter().copied()).target_id,
        }
        objects
    }
}

#[derive(Args)]
struct Output {
    /// Product options as JSON, or @path to a JSON file
    #[arg(long)]
    options: Option<String>,

    /// Output directory (overrides the options' destDir)
    #[arg(long)]
    dest: Option<PathBuf>,

    /// Print the returned data as JSON
    #[arg(long)]
    print: bool,
}

impl Output {
    fn apply(&self, out: &mut OutputOptions) {
        if let Some(dest) = &self.dest {
            out.dest_dir = dest.clone();
        }
        out.return_data |= self.print;
    }
}

#[derive(Subcommand)]
enum Command {
    /// Standard XRT light curves
    LightCurves {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        output: Output,
    },
    /// Automatic spectral fits
    Spectra {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        output: Output,
    },
    /// Burst-analyser light curves
    BurstAnalyser {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        output: Output,
    },
    /// Position estimates
    Positions {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        output: Output,
    },
    /// Archived observation files
    ObsData {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        output: Output,
    },
    /// Submit a light-curve rebin job
    Rebin {
        #[command(flatten)]
        target: Target,
        /// Rebin request as JSON, or @path
        #[arg(long)]
        request: Option<String>,
    },
    /// Submit a time-sliced spectrum job
    Timeslice {
        #[command(flatten)]
        target: Target,
        /// Time-slice request as JSON, or @path
        #[arg(long)]
        request: String,
    },
    /// Inspect, wait for, cancel or fetch a submitted job
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Args)]
struct JobRef {
    /// Job type: rebin or timeslice
    #[arg(long, value_parser = parse_kind)]
    kind: JobKind,
    /// Job ID as printed on submission
    #[arg(long)]
    id: String,
}

impl JobRef {
    fn handle(&self) -> JobHandle {
        JobHandle::new(self.kind, self.id.as_str())
    }
}

#[derive(Subcommand)]
enum JobAction {
    Status {
        #[command(flatten)]
        job: JobRef,
    },
    Cancel {
        #[command(flatten)]
        job: JobRef,
    },
    Wait {
        #[command(flatten)]
        job: JobRef,
        /// Seconds between polls
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
        interval: u64,
        #[arg(long)]
        max_polls: Option<usize>,
    },
    Fetch {
        #[command(flatten)]
        job: JobRef,
        #[command(flatten)]
        output: Output,
    },
}

fn parse_kind(s: &str) -> Result<JobKind, String> {
    match s {
        "rebin" => Ok(JobKind::Rebin),
        "timeslice" => Ok(JobKind::Timeslice),
        other => Err(format!("unknown job kind '{other}' (expected rebin or timeslice)")),
    }
}

/// Reads a JSON argument given inline or as `@path`; absent means defaults.
fn json_arg<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T> {
    let Some(raw) = raw else {
        return Ok(T::default());
    };
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("parsing JSON argument")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    serde_json::to_writer_pretty(std::io::stdout(), value)?;
    println!();
    Ok(())
}

fn print_returned<T: Serialize>(value: Option<T>) -> Result<()> {
    match value {
        Some(v) => print_json(&v),
        None => Ok(()),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let client = Client::new(cli.url.clone(), cli.insecure.then_some(false))
        .context("configuring client")?
        .with_retry_max(cli.retry_max);

    match cli.command {
        Command::LightCurves { target, output } => {
            let mut opts: LightCurveOptions = json_arg(output.options.as_deref())?;
            output.apply(&mut opts.output);
            print_returned(client.get_light_curves(&target.objects(), &opts)?)
        }
        Command::Spectra { target, output } => {
            let mut opts: SpectrumOptions = json_arg(output.options.as_deref())?;
            output.apply(&mut opts.output);
            print_returned(client.get_spectra(&target.objects(), &opts)?)
        }
        Command::BurstAnalyser { target, output } => {
            let mut opts: BurstAnalyserOptions = json_arg(output.options.as_deref())?;
            output.apply(&mut opts.output);
            print_returned(client.get_burst_analyser(&target.objects(), &opts)?)
        }
        Command::Positions { target, output } => {
            let mut opts: PositionOptions = json_arg(output.options.as_deref())?;
            output.apply(&mut opts.output);
            print_returned(client.get_positions(&target.objects(), &opts)?)
        }
        Command::ObsData { target, output } => {
            let mut opts: ObsDataOptions = json_arg(output.options.as_deref())?;
            output.apply(&mut opts.output);
            print_returned(client.get_obs_data(&target.objects(), &opts)?)
        }
        Command::Rebin { target, request } => {
            let request: RebinRequest = json_arg(request.as_deref())?;
            print_json(&client.rebin_light_curve(&target.objects(), &request)?)
        }
        Command::Timeslice { target, request } => {
            let request: TimesliceRequest = json_arg(Some(request.as_str()))?;
            print_json(&client.start_timeslice(&target.objects(), &request)?)
        }
        Command::Job { action } => run_job(&client, action),
    }
}

fn run_job(client: &Client, action: JobAction) -> Result<()> {
    match action {
        JobAction::Status { job } => print_json(&client.job_status(&job.handle())?),
        JobAction::Cancel { job } => {
            let handle = job.handle();
            if !client.cancel_job(&handle)? {
                bail!("{handle} could not be cancelled");
            }
            Ok(())
        }
        JobAction::Wait {
            job,
            interval,
            max_polls,
        } => {
            let status =
                client.wait_for_job(&job.handle(), Duration::from_secs(interval), max_polls)?;
            print_json(&status)
        }
        JobAction::Fetch { job, output } => {
            let handle = job.handle();
            match handle.kind() {
                JobKind::Rebin => {
                    let mut opts: LightCurveOptions = json_arg(output.options.as_deref())?;
                    output.apply(&mut opts.output);
                    print_returned(client.get_rebinned_light_curve(&handle, &opts)?)
                }
                JobKind::Timeslice => {
                    let mut opts: SpectrumOptions = json_arg(output.options.as_deref())?;
                    output.apply(&mut opts.output);
                    print_returned(client.get_timesliced_spectra(&handle, &opts)?)
                }
            }
        }
    }
}
