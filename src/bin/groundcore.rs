use clap::{App, Arg};
use groundcore::handler::MemoryInterface;
use groundcore::limits::OverallState;
use groundcore::queue::QueueState;
use groundcore::{Catalog, CoreConfig, GroundAgent};
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_STATUS_PERIOD_S: &str = "10";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("groundcore")
        .version("0.1.0")
        .author("Ground Systems Engineering Team")
        .about("Command and telemetry ground core")
        .arg(
            Arg::with_name("catalog")
                .short("c")
                .long("catalog")
                .value_name("FILE")
                .help("Packet definition catalog (JSON)")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("FILE")
                .help("Runtime configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("queue")
                .short("q")
                .long("queue")
                .value_name("NAME")
                .help("Create a released command queue")
                .takes_value(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("status-period")
                .long("status-period")
                .value_name("SECONDS")
                .help("Period of the overall limits state report")
                .takes_value(true)
                .default_value(DEFAULT_STATUS_PERIOD_S)
                .validator(|v| match v.parse::<u64>() {
                    Ok(s) if s > 0 => Ok(()),
                    _ => Err("Period must be a positive number of seconds".into()),
                }),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => groundcore::config::load_config(path)?,
        None => CoreConfig::default(),
    };
    // validator guarantees a positive integer
    let period = matches
        .value_of("status-period")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10);

    let catalog = Catalog::from_json_file(matches.value_of("catalog").unwrap_or_default())?;
    let agent = GroundAgent::new(catalog, config);
    info!(
        "Ground core starting in scope {} with targets {:?}",
        agent.config().scope,
        agent.get_target_names()
    );

    let mut tasks = Vec::new();
    for target in agent.get_target_names() {
        tasks.push(agent.spawn_decom(&target)?);
        // loopback link until a physical interface is configured
        let interface = MemoryInterface::new(&format!("{target}_INT"));
        tasks.push(agent.spawn_handler(&target, Box::new(interface))?);
    }
    if let Some(name) = agent.config().default_queue.clone() {
        tasks.push(agent.spawn_queue_processor(&name, QueueState::Hold));
    }
    for name in matches.values_of("queue").into_iter().flatten() {
        tasks.push(agent.spawn_queue_processor(name, QueueState::Release));
    }

    let mut interval = tokio::time::interval(Duration::from_secs(period));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                match agent.limits().get_overall_limits_state(&[]) {
                    OverallState::Green => info!("Overall limits state: GREEN"),
                    OverallState::Yellow => warn!("Overall limits state: YELLOW"),
                    OverallState::Red => error!("Overall limits state: RED"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }
    for task in tasks {
        task.abort();
    }
    Ok(())
}
