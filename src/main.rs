use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write as _;
use std::sync::Arc;
use veriwipe::cert::{
    load_certificate, render_text_report, save_certificate, verify_chain, CertificateBuilder,
};
use veriwipe::crypto::Signer;
use veriwipe::dispatch::OverwriteDispatcher;
use veriwipe::hidden::UnsupportedSectorSource;
use veriwipe::orchestrator::WipeOrchestrator;
use veriwipe::progress::{CancelToken, ProgressSink, ProgressUpdate};
use veriwipe::safety::{SafetyGuard, SafetyPolicy};
use veriwipe::verify::{VerificationEngine, VerifyPolicy};
use veriwipe::{
    Device, EngineConfig, MediaClass, SystemOverride, WipeMethod, WipeRequest, WipeState,
    DEFAULT_SECTOR_SIZE,
};

#[derive(Parser)]
#[command(name = "veriwipe")]
#[command(about = "Disk wipe orchestration with verified, signed proof of erasure")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wipe a device and emit a signed certificate
    Wipe {
        /// Device path (e.g. /dev/sdb)
        device: String,

        /// Wiping method (zero, random, dod5220, gutmann)
        #[arg(short, long, default_value = "random")]
        method: String,

        /// Pass count for methods without a fixed schedule
        #[arg(short, long, default_value = "1")]
        passes: u32,

        /// Skip post-wipe verification
        #[arg(long)]
        no_verify: bool,

        /// Detect and remove HPA before wiping
        #[arg(long)]
        remove_hidden: bool,

        /// Also force DCO removal (permanent, changes drive identity)
        #[arg(long)]
        force_dco: bool,

        /// Continue past a failed pass (best-effort wipe)
        #[arg(long)]
        best_effort: bool,

        /// Treat the target as a system disk (enables the override flow)
        #[arg(long)]
        system_disk: bool,

        /// Media class override (rotational, ssd, nvme, removable)
        #[arg(long)]
        media_class: Option<String>,

        /// Total sectors; defaults to the size reported by the device
        #[arg(long)]
        sectors: Option<u64>,

        /// Sector size in bytes
        #[arg(long, default_value_t = DEFAULT_SECTOR_SIZE)]
        sector_size: u32,

        /// Confirmation token; prompted interactively when omitted
        #[arg(long)]
        confirm: Option<String>,

        /// Second confirmation token for system-disk override
        #[arg(long)]
        override_token: Option<String>,

        /// Operator identifier recorded in the certificate
        #[arg(long)]
        operator: Option<String>,

        /// HMAC signing secret; a fresh one is generated when omitted
        #[arg(long, env = "VERIWIPE_HMAC_SECRET")]
        hmac_secret: Option<String>,

        /// Chain this certificate to a previous one for the same device
        #[arg(long)]
        prior_cert: Option<String>,

        /// Certificate output path
        #[arg(short, long, default_value = "wipe-certificate.json")]
        cert_output: String,

        /// Print the certificate JSON instead of the text report
        #[arg(long)]
        json: bool,
    },

    /// Sample a device and report a verification verdict without wiping
    Verify {
        /// Device path to verify
        device: String,

        /// Expected fill (random, zero)
        #[arg(long, default_value = "random")]
        expect: String,

        /// Extent in bytes; defaults to the device size
        #[arg(long)]
        extent: Option<u64>,
    },

    /// Inspect stored certificates
    Cert {
        #[command(subcommand)]
        command: CertCommands,
    },
}

#[derive(Subcommand)]
enum CertCommands {
    /// Render a stored certificate as a text report
    Show { path: String },

    /// Check a certificate's content hash and (with a secret) its signature
    Verify {
        path: String,
        #[arg(long, env = "VERIWIPE_HMAC_SECRET")]
        hmac_secret: Option<String>,
    },

    /// Check that certificates form a valid per-device hash chain
    Chain { paths: Vec<String> },
}

struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(1000);
        bar.set_style(
            ProgressStyle::with_template("{bar:48.green} {percent:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self { bar }
    }
}

impl ProgressSink for CliProgress {
    fn publish(&self, update: ProgressUpdate) {
        if update.phase == WipeState::Erasing && update.total_passes > 0 {
            self.bar.set_position((update.percent * 10.0) as u64);
            self.bar.set_message(format!(
                "pass {}/{}",
                update.current_pass, update.total_passes
            ));
        } else {
            self.bar.set_message(format!("{:?}", update.phase));
        }
    }
}

fn parse_method(name: &str) -> Result<WipeMethod> {
    match name {
        "zero" => Ok(WipeMethod::Zero),
        "random" => Ok(WipeMethod::Random),
        "dod5220" | "dod" => Ok(WipeMethod::DoD5220),
        "gutmann" => Ok(WipeMethod::Gutmann),
        "secure-erase" => Ok(WipeMethod::SecureErase),
        other => Err(anyhow!("unknown method: {}", other)),
    }
}

fn parse_media_class(name: &str) -> Result<MediaClass> {
    match name {
        "rotational" | "hdd" => Ok(MediaClass::Rotational),
        "ssd" => Ok(MediaClass::Ssd),
        "nvme" => Ok(MediaClass::Nvme),
        "removable" | "usb" => Ok(MediaClass::Removable),
        other => Err(anyhow!("unknown media class: {}", other)),
    }
}

fn guess_media_class(path: &str) -> MediaClass {
    if path.contains("nvme") {
        MediaClass::Nvme
    } else if path.contains("mmcblk") || path.contains("usb") {
        MediaClass::Removable
    } else {
        MediaClass::Rotational
    }
}

fn snapshot_device(
    path: &str,
    sectors: Option<u64>,
    sector_size: u32,
    media_class: Option<String>,
    system_disk: bool,
) -> Result<Device> {
    let media_class = match media_class {
        Some(name) => parse_media_class(&name)?,
        None => guess_media_class(path),
    };
    let total_sectors = match sectors {
        Some(n) => n,
        None => {
            let len = std::fs::metadata(path)
                .with_context(|| format!("cannot stat {}", path))?
                .len();
            if len == 0 {
                bail!("{} reports zero size; pass --sectors explicitly", path);
            }
            len / sector_size as u64
        }
    };
    Ok(Device {
        path: path.to_string(),
        total_sectors,
        sector_size,
        media_class,
        is_system_disk: system_disk,
        model: "Unknown".to_string(),
        serial: "Unknown".to_string(),
    })
}

fn prompt(message: &str) -> Result<String> {
    print!("{}", message);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[allow(clippy::too_many_arguments)]
async fn run_wipe(
    device_path: String,
    method: String,
    passes: u32,
    no_verify: bool,
    remove_hidden: bool,
    force_dco: bool,
    best_effort: bool,
    system_disk: bool,
    media_class: Option<String>,
    sectors: Option<u64>,
    sector_size: u32,
    confirm: Option<String>,
    override_token: Option<String>,
    operator: Option<String>,
    hmac_secret: Option<String>,
    prior_cert: Option<String>,
    cert_output: String,
    json: bool,
) -> Result<()> {
    let method = parse_method(&method)?;
    let device = snapshot_device(&device_path, sectors, sector_size, media_class, system_disk)?;

    println!(
        "{}",
        format!(
            "ALL DATA ON {} ({} bytes) WILL BE PERMANENTLY DESTROYED",
            device.path,
            device.capacity_bytes()
        )
        .red()
        .bold()
    );

    let confirmation_token = match confirm {
        Some(token) => token,
        None => prompt(&format!(
            "Type the device path ({}) to confirm: ",
            SafetyGuard::expected_confirmation(&device)
        ))?,
    };
    let system_override = if device.is_system_disk {
        let second_token = match override_token {
            Some(token) => token,
            None => prompt(&format!(
                "System disk! Type '{}' to override: ",
                SafetyGuard::expected_override(&device)
            ))?,
        };
        Some(SystemOverride { second_token })
    } else {
        None
    };

    let mut request = WipeRequest::new(device, method, confirmation_token);
    if method.fixed_pass_count().is_none() {
        request.passes = passes;
    }
    request.verify = !no_verify;
    request.remove_hidden_areas = remove_hidden;
    request.allow_dco_removal = force_dco;
    request.tolerate_pass_failure = best_effort;
    request.system_override = system_override;
    request.operator_id = operator;

    let prior_hash = match prior_cert {
        Some(path) => Some(load_certificate(&path)?.content_hash),
        None => None,
    };

    let signer = match hmac_secret {
        Some(secret) => Signer::hmac_from_secret(secret.as_bytes()),
        None => {
            println!("note: generated a one-shot HMAC secret; set VERIWIPE_HMAC_SECRET to re-verify later");
            Signer::generate_hmac()?
        }
    };

    let config = EngineConfig::default();
    let progress = Arc::new(CliProgress::new());
    let orchestrator = WipeOrchestrator::new(
        Arc::new(OverwriteDispatcher::new(config.clone())),
        Arc::new(UnsupportedSectorSource),
        SafetyPolicy::default(),
        signer,
        config,
    )
    .with_sink(progress.clone());

    let report = orchestrator
        .run(request, CancelToken::new(), prior_hash)
        .await?;
    progress.bar.finish_and_clear();

    save_certificate(&report.certificate, &cert_output)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report.certificate)?);
    } else {
        println!("{}", render_text_report(&report.certificate));
    }
    println!("certificate written to {}", cert_output);

    match report.state {
        WipeState::Done => Ok(()),
        state => {
            let detail = report.failure.unwrap_or_default();
            Err(anyhow!("operation ended in {:?}: {}", state, detail))
        }
    }
}

async fn run_verify(device_path: String, expect: String, extent: Option<u64>) -> Result<()> {
    let policy = match expect.as_str() {
        "random" => VerifyPolicy::random_fill(),
        "zero" => VerifyPolicy::fixed_pattern(0x00),
        other => bail!("unknown expectation: {}", other),
    };
    let device = snapshot_device(&device_path, None, DEFAULT_SECTOR_SIZE, None, false)?;
    let extent = extent.unwrap_or_else(|| device.capacity_bytes());

    let engine = VerificationEngine::new(policy);
    let verdict = tokio::task::spawn_blocking(move || engine.verify(&device, extent)).await??;

    println!(
        "verdict: {:?} (mean entropy {:.3}, min {:.3}, {} pattern match(es), {} unreadable)",
        verdict.classification,
        verdict.mean_entropy,
        verdict.min_entropy,
        verdict.pattern_matches,
        verdict.unreadable_samples
    );
    Ok(())
}

fn run_cert(command: CertCommands) -> Result<()> {
    match command {
        CertCommands::Show { path } => {
            let certificate = load_certificate(&path)?;
            println!("{}", render_text_report(&certificate));
        }
        CertCommands::Verify { path, hmac_secret } => {
            let certificate = load_certificate(&path)?;
            let recomputed = veriwipe::cert::content_hash(&certificate)?;
            if recomputed != certificate.content_hash {
                bail!("content hash mismatch: certificate has been altered");
            }
            println!("content hash: {}", "OK".green());
            match hmac_secret {
                Some(secret) => {
                    let builder =
                        CertificateBuilder::new(Signer::hmac_from_secret(secret.as_bytes()));
                    if builder.verify(&certificate)? {
                        println!("signature:    {}", "OK".green());
                    } else {
                        bail!("signature check failed");
                    }
                }
                None => println!("signature:    skipped (no secret supplied)"),
            }
        }
        CertCommands::Chain { paths } => {
            let certificates = paths
                .iter()
                .map(|p| load_certificate(p))
                .collect::<Result<Vec<_>, _>>()?;
            verify_chain(&certificates)?;
            println!("chain of {} certificate(s): {}", certificates.len(), "OK".green());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Wipe {
            device,
            method,
            passes,
            no_verify,
            remove_hidden,
            force_dco,
            best_effort,
            system_disk,
            media_class,
            sectors,
            sector_size,
            confirm,
            override_token,
            operator,
            hmac_secret,
            prior_cert,
            cert_output,
            json,
        } => {
            run_wipe(
                device,
                method,
                passes,
                no_verify,
                remove_hidden,
                force_dco,
                best_effort,
                system_disk,
                media_class,
                sectors,
                sector_size,
                confirm,
                override_token,
                operator,
                hmac_secret,
                prior_cert,
                cert_output,
                json,
            )
            .await
        }
        Commands::Verify {
            device,
            expect,
            extent,
        } => run_verify(device, expect, extent).await,
        Commands::Cert { command } => run_cert(command),
    }
}
