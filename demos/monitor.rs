use heatpump_sync::{Config, Controller, Event};
use std::env;

#[tokio::main]
async fn main() -> heatpump_sync::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    println!(
        "Monitoring heat pump at {} and thermostat at {}",
        config.heat_pump.url, config.thermostat.url
    );

    let controller = Controller::builder(config)
        .on_event(|event| match event {
            Event::Render { field, value: Some(v) } => println!("{field}: {v}"),
            Event::Render { field, value: None } => println!("{field}: --"),
            Event::StateChanged { field, state } => println!("{field} -> {state:?}"),
            Event::Notice(notice) => eprintln!("[{:?}] {}", notice.kind, notice.message),
            Event::Connection { device, online } => {
                println!("{} {}", device.name(), if *online { "online" } else { "OFFLINE" })
            }
            Event::Snapshot(_) => {}
        })
        .build()?;

    // keep one handle alive so the controller runs until interrupted
    let _handle = controller.handle();
    controller.run().await;
    Ok(())
}
