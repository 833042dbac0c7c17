//! JSON-RPC control plane (spec §4.I, §6): streaming framer, parameter
//! decoders, and the method dispatch table wired to the bdev and NVMf
//! components. Grounded on the teacher's `jsonrpc_register` registry
//! (`io-engine/src/jsonrpc.rs`), reworked synchronous since the
//! vhost-user/NVMe-oF transport socket driving it asynchronously is out
//! of scope.

pub mod connection;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod framer;

pub use connection::Connection;
pub use dispatch::Dispatcher;
pub use error::{Code, RpcError};
pub use framer::{scan_frame, FrameResult};

use std::time::Duration;

use serde_json::{json, Value};

use crate::{
    bdev::{
        backends::{delay, ocssd, pmem, split},
        registry, BdevError,
    },
    external::{NbdTransport, NullNbdTransport},
    nvmf,
};
use decode::{decode_string, decode_uint32, decode_uint32_opt, decode_uint64};
use error::Code as C;

fn bad_params(msg: impl ToString) -> RpcError {
    RpcError::new(C::InvalidParams, msg)
}

fn internal(msg: impl ToString) -> RpcError {
    RpcError::new(C::InternalError, msg)
}

fn bdev_err(e: BdevError) -> RpcError {
    internal(e.to_string())
}

fn params_or_empty(params: Option<Value>) -> Value {
    params.unwrap_or_else(|| json!({}))
}

fn micros(obj: &Value, name: &str) -> Result<Duration, RpcError> {
    Ok(Duration::from_micros(decode_uint64(obj, name)?))
}

/// Build the full method table named verbatim in spec §6.
pub fn build_dispatcher() -> Dispatcher {
    let mut d = Dispatcher::new();

    d.register("get_nvmf_subsystems", |_params| {
        let target = nvmf::target::global().lock();
        let subsystems: Vec<Value> = target
            .subsystems
            .nqns()
            .into_iter()
            .filter_map(|nqn| target.subsystems.get(&nqn).map(|s| {
                json!({
                    "nqn": s.nqn,
                    "subtype": format!("{:?}", s.subtype),
                    "mode": format!("{:?}", s.mode),
                    "listen_addresses": s.listen_addrs.iter().map(|a| format!("{}:{}", a.traddr, a.trsvcid)).collect::<Vec<_>>(),
                    "allow_any_host": s.allow_any_host,
                })
            }))
            .collect();
        Ok(Value::Array(subsystems))
    });

    d.register("construct_nvmf_subsystem", |params| {
        let p = params_or_empty(params);
        let nqn = decode_string(&p, "nqn")?;
        let mode_str = decode_string(&p, "mode")?;
        let core = decode_uint32_opt(&p, "core")?.unwrap_or(0);
        let mode = match mode_str.as_str() {
            "Direct" => nvmf::subsystem::Mode::Direct,
            "Virtual" => nvmf::subsystem::Mode::Virtual,
            other => return Err(bad_params(format!("unknown mode '{other}'"))),
        };
        let subsystem = nvmf::Subsystem::new(nqn.clone(), nvmf::subsystem::SubType::Nvme, mode, core);
        nvmf::target::global()
            .lock()
            .subsystems
            .register(subsystem)
            .map_err(|e| internal(e.to_string()))?;
        Ok(json!({"nqn": nqn}))
    });

    d.register("delete_nvmf_subsystem", |params| {
        let p = params_or_empty(params);
        let nqn = decode_string(&p, "nqn")?;
        nvmf::target::global()
            .lock()
            .subsystems
            .remove(&nqn)
            .map(|_| Value::Null)
            .ok_or_else(|| internal(format!("subsystem {nqn} not found")))
    });

    d.register("bdev_delay_create", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let base_bdev_name = decode_string(&p, "base_bdev_name")?;
        let avg_read = micros(&p, "avg_read_us")?;
        let p99_read = micros(&p, "p99_read_us")?;
        let avg_write = micros(&p, "avg_write_us")?;
        let p99_write = micros(&p, "p99_write_us")?;
        let base = registry::global()
            .lock()
            .lookup(&base_bdev_name)
            .ok_or_else(|| internal(format!("bdev {base_bdev_name} not found")))?;
        let bdev = delay::bdev_delay_create(name.clone(), base, avg_read, p99_read, avg_write, p99_write)
            .map_err(|e| internal(e.to_string()))?;
        Ok(json!({"name": bdev.name}))
    });

    d.register("bdev_delay_delete", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        delay::bdev_delay_delete(&name).map_err(bdev_err)?;
        Ok(Value::Null)
    });

    d.register("bdev_delay_update_latency", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let avg_read = micros(&p, "avg_read_us")?;
        let p99_read = micros(&p, "p99_read_us")?;
        let avg_write = micros(&p, "avg_write_us")?;
        let p99_write = micros(&p, "p99_write_us")?;
        let handle = delay::devices()
            .lock()
            .get(&name)
            .cloned()
            .ok_or_else(|| internal(format!("delay device {name} not found")))?;
        handle
            .update_latency(avg_read, p99_read, avg_write, p99_write)
            .map_err(|e| bad_params(e.to_string()))?;
        Ok(Value::Null)
    });

    d.register("bdev_pmem_create_pool", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let num_blocks = decode_uint64(&p, "num_blocks")?;
        let block_size = decode_uint32(&p, "block_size")?;
        pmem::pools()
            .lock()
            .create_pool(&name, num_blocks, block_size)
            .map_err(|e| internal(e.to_string()))?;
        Ok(Value::Null)
    });

    d.register("bdev_pmem_delete_pool", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        pmem::pools().lock().delete_pool(&name).map_err(|e| internal(e.to_string()))?;
        Ok(Value::Null)
    });

    d.register("bdev_pmem_get_pool_info", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let info = pmem::pools().lock().get_pool_info(&name).map_err(|e| internal(e.to_string()))?;
        Ok(json!({"block_size": info.block_size, "num_blocks": info.num_blocks}))
    });

    d.register("bdev_pmem_create", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let pool_name = decode_string(&p, "pool_name")?;
        let bdev = pmem::bdev_pmem_create(name, &pool_name).map_err(bdev_err)?;
        Ok(json!({"name": bdev.name}))
    });

    d.register("bdev_pmem_delete", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        pmem::bdev_pmem_delete(&name).map_err(bdev_err)?;
        Ok(Value::Null)
    });

    d.register("bdev_split_create", |params| {
        let p = params_or_empty(params);
        let base_bdev_name = decode_string(&p, "base_bdev_name")?;
        let split_count = decode_uint32(&p, "split_count")?;
        let split_size_mb = decode_uint32_opt(&p, "split_size_mb")?.unwrap_or(0) as u64;
        let names = split::bdev_split_create(&base_bdev_name, split_count, split_size_mb).map_err(bdev_err)?;
        Ok(json!(names))
    });

    d.register("bdev_split_delete", |params| {
        let p = params_or_empty(params);
        let base_bdev_name = decode_string(&p, "base_bdev_name")?;
        split::bdev_split_delete(&base_bdev_name).map_err(bdev_err)?;
        Ok(Value::Null)
    });

    d.register("construct_ocssd_bdev", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        let block_size = decode_uint32(&p, "block_size")?;
        let block_count = decode_uint64(&p, "block_count")?;
        let bdev = ocssd::construct_ocssd_bdev(name, block_size, block_count).map_err(bdev_err)?;
        Ok(json!({"name": bdev.name}))
    });

    d.register("delete_ocssd_bdev", |params| {
        let p = params_or_empty(params);
        let name = decode_string(&p, "name")?;
        ocssd::delete_ocssd_bdev(&name).map_err(bdev_err)?;
        Ok(Value::Null)
    });

    d.register("ae4dma_scan_accel_module", |_params| {
        // Real PCI enumeration is out of scope (spec §1); this reports
        // the fixed ring geometry every engine is built from (spec §6).
        Ok(json!({
            "max_hw_queues": crate::ae4dma::MAX_HW_QUEUES,
            "descriptors_per_queue": crate::ae4dma::DESCRIPTORS_PER_QUEUE,
        }))
    });

    d.register("stop_nbd_disk", |params| {
        let p = params_or_empty(params);
        let nbd_device = decode_string(&p, "nbd_device")?;
        NullNbdTransport
            .disconnect(&nbd_device)
            .map_err(|e| internal(e.to_string()))?;
        Ok(Value::Null)
    });

    d
}
