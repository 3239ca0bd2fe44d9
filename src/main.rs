use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;

use sensor_provision::ble::BtleplugTransport;
use sensor_provision::permission::AlwaysGranted;
use sensor_provision::provisioner::AttemptState;
use sensor_provision::registry::{HttpSensorRegistry, StaticToken};
use sensor_provision::transport::{PeripheralHandle, PeripheralId};
use sensor_provision::{
    Cancellation, Config, DeviceSelector, DiscoveryFeed, Identity, PlaceId, ProvisioningOutcome,
    ProvisioningRequest, ProvisioningUpdate, Provisioner, SensorKind, WifiCredentials,
};

/// Provision an esp32 environmental sensor over BLE
#[derive(Parser, Debug)]
#[command(name = "sensor-provision", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Backend base URL, overrides the config file
    #[arg(long)]
    backend: Option<String>,

    /// Account id, 40 hex characters
    #[arg(long, required_unless_present = "init_config")]
    account: Option<Identity>,

    /// Backend id of the place the sensor is installed in
    #[arg(long, required_unless_present = "init_config", allow_negative_numbers = true)]
    place: Option<i32>,

    /// Sensor hardware: aht10 or scd4x
    #[arg(long, required_unless_present = "init_config")]
    kind: Option<SensorKind>,

    #[arg(long, requires = "password")]
    ssid: Option<String>,

    #[arg(long, requires = "ssid")]
    password: Option<String>,

    /// Provision this peripheral id instead of choosing interactively
    #[arg(long)]
    device: Option<String>,

    /// How long to scan before choosing a device
    #[arg(long, default_value_t = 10)]
    scan_secs: u64,

    /// Backend session token
    #[arg(long, env = "SENSOR_PROVISION_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

/// Scans for a while, lists what was found and reads a choice from stdin.
struct Interactive {
    scan: Duration,
}

#[async_trait]
impl DeviceSelector for Interactive {
    async fn select(&mut self, feed: &mut DiscoveryFeed) -> Option<PeripheralHandle> {
        println!("Scanning for {} seconds...", self.scan.as_secs());
        tokio::time::sleep(self.scan).await;

        let candidates = feed.candidates().to_vec();
        if candidates.is_empty() {
            println!("No sensors found");
            return None;
        }

        for (index, handle) in candidates.iter().enumerate() {
            println!("  [{}] {} ({})", index, handle.name, handle.id);
        }
        println!("Select a device by number (empty to abort):");

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        let line = match line {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                log::error!("Failed to read selection: {}", e);
                return None;
            }
            Err(e) => {
                log::error!("Selection prompt failed: {}", e);
                return None;
            }
        };

        match line.trim().parse::<usize>() {
            Ok(index) => candidates.get(index).cloned(),
            Err(_) => None,
        }
    }
}

/// Waits for one specific peripheral to show up.
struct ById {
    id: PeripheralId,
    wait: Duration,
}

#[async_trait]
impl DeviceSelector for ById {
    async fn select(&mut self, feed: &mut DiscoveryFeed) -> Option<PeripheralHandle> {
        let wanted = &self.id;
        let found = tokio::time::timeout(self.wait, async {
            while let Some(handle) = feed.next().await {
                if &handle.id == wanted {
                    return Some(handle);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(handle)) => Some(handle),
            _ => {
                println!("Device {} not found", wanted);
                None
            }
        }
    }
}

fn describe(state: AttemptState) -> String {
    match state {
        AttemptState::Idle => "Starting".to_string(),
        AttemptState::RequestingPermission => "Checking radio permissions".to_string(),
        AttemptState::Scanning => "Scanning".to_string(),
        AttemptState::AwaitingSelection => "Waiting for device selection".to_string(),
        AttemptState::Connecting => "Connecting".to_string(),
        AttemptState::Discovering => "Discovering services".to_string(),
        AttemptState::ReadingIdentity => "Reading device UUID".to_string(),
        AttemptState::AcquiringIdentity => "Registering sensor with backend".to_string(),
        AttemptState::Writing => "Writing configuration".to_string(),
        AttemptState::Done => "Done".to_string(),
        AttemptState::Failed(stage) => format!("Failed during {}", stage),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    if cli.init_config {
        Config::default().save_to(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load_from(&config_path)?;
    if let Some(backend) = cli.backend {
        config.backend_url = backend;
    }

    let (Some(account), Some(place), Some(kind)) = (cli.account, cli.place, cli.kind) else {
        return Err("--account, --place and --kind are required".into());
    };

    let wifi = match (cli.ssid, cli.password) {
        (Some(ssid), Some(password)) => {
            let wifi = WifiCredentials::new(ssid, password);
            wifi.check()?;
            Some(wifi)
        }
        _ => None,
    };

    let request = ProvisioningRequest {
        account,
        place: PlaceId(place),
        sensor_kind: kind,
        wifi,
    };

    let transport = std::sync::Arc::new(BtleplugTransport::new().await?);
    let registry = HttpSensorRegistry::new(
        &config.backend_url,
        config.request_timeout(),
        StaticToken::new(cli.token),
    )?;

    // Progress is printed from its own thread
    let (sender, receiver) = mpsc::channel::<ProvisioningUpdate>();
    let printer = std::thread::spawn(move || {
        for update in receiver {
            match update {
                ProvisioningUpdate::State(state) => println!("==> {}", describe(state)),
                ProvisioningUpdate::Discovered(handle) => {
                    println!("    found {} ({})", handle.name, handle.id)
                }
            }
        }
    });

    let provisioner =
        Provisioner::new(transport, registry, AlwaysGranted, &config).with_updates(sender);

    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    let mut selector: Box<dyn DeviceSelector> = match cli.device {
        Some(id) => Box::new(ById {
            id: PeripheralId::new(id),
            wait: Duration::from_secs(cli.scan_secs),
        }),
        None => Box::new(Interactive {
            scan: Duration::from_secs(cli.scan_secs),
        }),
    };

    let outcome = provisioner.run(&request, selector.as_mut(), cancel).await;

    // Closes the update channel once the scan task has wound down
    drop(provisioner);
    if !matches!(tokio::task::spawn_blocking(move || printer.join()).await, Ok(Ok(()))) {
        log::warn!("Progress printer did not finish cleanly");
    }

    match outcome {
        ProvisioningOutcome::Done(issued) => {
            println!("Sensor provisioned, sensor id {}", issued);
            Ok(ExitCode::SUCCESS)
        }
        ProvisioningOutcome::Failed(failure) => {
            eprintln!("{}", failure);
            if failure.may_leave_orphaned_record() {
                eprintln!(
                    "warning: the backend already registered this sensor but the device was not \
                     fully configured; retry or remove the sensor record"
                );
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
