use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use bridge_eed::{
    configuration::{Configuration, Parser},
    frame::PROBE_ETHER_TYPE,
    scheduling, session,
    socket::RawSocket,
};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let conf = Configuration::parse();
    if let Err(e) = conf.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }
    let engine = conf.engine_config();

    log::info!(
        "Configuration valid. Measuring {} -> {}",
        conf.ifout,
        conf.ifin
    );

    if conf.realtime {
        scheduling::request_realtime();
    }

    let egress = match RawSocket::open_egress(&conf.ifout) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let ingress = match RawSocket::open_ingress(&conf.ifin, PROBE_ETHER_TYPE) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let interrupt = CancellationToken::new();
    {
        let stop = interrupt.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, stopping");
                stop.cancel();
            }
        });
    }

    let report = session::run_session(&egress, ingress, &engine, conf.drain, &interrupt).await;
    report.print(conf.output_format);

    ExitCode::SUCCESS
}
