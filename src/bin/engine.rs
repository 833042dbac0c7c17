//! Thin wiring binary: brings up the data plane's subsystems in dependency
//! order, launches a reactor per core, and tears everything back down on
//! `SIGINT`/`SIGTERM` (spec §2 row J). Grounded on the teacher's
//! `bin/io-engine.rs` bring-up sequence, minus the gRPC/persistent-store
//! layers this crate does not implement.

use std::thread;

use dataplane::{
    core::{event_call, Event, Reactors},
    rpc::build_dispatcher,
    subsys::{init::InitError, Config, Subsystem, SubsystemRegistry},
};
use nix::sys::signal::{SigSet, Signal};

/// Validates and publishes the process-wide [`Config`] (spec §4.H clamps).
struct ConfigSubsystem;

impl Subsystem for ConfigSubsystem {
    fn name(&self) -> &str {
        "config"
    }

    fn init(&mut self) -> Result<(), InitError> {
        Config::set_global(Config::default()).unwrap_or_else(|e| {
            panic!("built-in default configuration failed validation: {}", e)
        });
        log::info!("configuration validated and published");
        Ok(())
    }

    fn fini(&mut self) {}
}

/// Registers every `bdev_*`/`nvmf_*`/`ae4dma_*` JSON-RPC method (spec §6)
/// once the subsystems it dispatches to are up.
struct RpcSubsystem;

impl Subsystem for RpcSubsystem {
    fn name(&self) -> &str {
        "rpc"
    }

    fn depends_on(&self) -> &[&str] {
        &["config"]
    }

    fn init(&mut self) -> Result<(), InitError> {
        let dispatcher = build_dispatcher();
        log::info!("json-rpc dispatch table ready");
        std::mem::forget(dispatcher); // handed off to the RPC transport in a real deployment
        Ok(())
    }

    fn fini(&mut self) {}
}

fn wait_for_shutdown_signal() {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    mask.thread_block().expect("failed to block shutdown signals");
    match mask.wait() {
        Ok(signal) => log::info!("received {signal:?}, shutting down"),
        Err(e) => log::warn!("sigwait failed ({e}), shutting down anyway"),
    }
    event_call(
        0,
        Event::new(
            |_, _| dataplane::core::app_stop(0),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        ),
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut registry = SubsystemRegistry::new();
    registry.register(Box::new(ConfigSubsystem));
    registry.register(Box::new(RpcSubsystem));
    registry.init_all().expect("subsystem bring-up failed");

    Reactors::init(1);
    thread::spawn(wait_for_shutdown_signal);

    Reactors::launch_all();
    registry.fini_all();
    std::process::exit(dataplane::core::app_stop_rc() as i32);
}
