//! Control-plane command dispatcher.
//!
//! A static name→handler table maps the textual command from an inbound
//! request to its handler; dispatch is an exact string match and unknown
//! names come back as `invalid_argument`. Handlers validate their typed
//! parameters before touching any state, so a failed command leaves
//! devices and tables exactly as they were.

pub mod wire;

use std::sync::Arc;

use encryption::{CipherRegistry, RegistryConfig};
use mapper::{
    CryptTargetType, DeviceRegistry, MapError, TableGeneration, TableSlot, TargetRegistry,
};
use serde_json::{json, Value};
use storage::StorePool;
use tracing::{debug, instrument, warn};

pub use wire::{CtlResponse, VERSION};
use wire::{
    error_code, CreateParams, DeviceInfo, DeviceParams, DeviceRow, Envelope, MessageParams,
    QueryParams, ReloadParams, RenameParams, StatusRow,
};

type Handler = fn(&Dispatcher, &Value) -> mapper::Result<Value>;

/// The command table. Order is cosmetic; lookup is by exact name.
const COMMANDS: &[(&str, Handler)] = &[
    ("version", cmd_version),
    ("targets", cmd_targets),
    ("create", cmd_create),
    ("info", cmd_info),
    ("names", cmd_names),
    ("suspend", cmd_suspend),
    ("remove", cmd_remove),
    ("remove_all", cmd_remove_all),
    ("rename", cmd_rename),
    ("resume", cmd_resume),
    ("clear", cmd_clear),
    ("deps", cmd_deps),
    ("reload", cmd_reload),
    ("status", cmd_status),
    ("message", cmd_message),
];

pub struct Dispatcher {
    devices: Arc<DeviceRegistry>,
    targets: TargetRegistry,
    ciphers: Arc<CipherRegistry>,
}

impl Dispatcher {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        targets: TargetRegistry,
        ciphers: Arc<CipherRegistry>,
    ) -> Self {
        Self {
            devices,
            targets,
            ciphers,
        }
    }

    /// Stock wiring: fresh device list, a cipher registry built for this
    /// machine, and the crypt target resolving backing stores from
    /// `stores`.
    pub fn with_defaults(config: RegistryConfig, stores: Arc<StorePool>) -> Self {
        let ciphers = Arc::new(CipherRegistry::new(config));
        let targets = TargetRegistry::new();
        CryptTargetType::register(&targets, Arc::clone(&ciphers), stores)
            .expect("crypt registration on a fresh registry cannot collide");
        Self::new(Arc::new(DeviceRegistry::new()), targets, ciphers)
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    /// Decode, dispatch, encode.
    pub fn handle_str(&self, input: &str) -> String {
        let response = match serde_json::from_str::<Value>(input) {
            Ok(request) => self.handle(request),
            Err(err) => CtlResponse::error("invalid_argument", format!("bad request: {}", err)),
        };
        serde_json::to_string(&response).unwrap_or_else(|err| {
            // a response we built ourselves should always serialize
            warn!(%err, "failed to encode response");
            r#"{"status":"error","code":"io_error"}"#.to_string()
        })
    }

    /// Dispatch one decoded request.
    #[instrument(skip_all, fields(command))]
    pub fn handle(&self, request: Value) -> CtlResponse {
        let envelope: Envelope = match serde_json::from_value(request.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                return CtlResponse::error(
                    "invalid_argument",
                    format!("request needs a command: {}", err),
                )
            }
        };
        tracing::Span::current().record("command", envelope.command.as_str());

        // every command is version checked; a client built against a newer
        // minor may depend on commands we do not have
        if let Some(v) = envelope.version {
            if v[0] != VERSION[0] || v[1] > VERSION[1] {
                return CtlResponse::error(
                    "protocol_error",
                    format!(
                        "protocol mismatch: dispatcher {}.{}.{}, request {}.{}.{}",
                        VERSION[0], VERSION[1], VERSION[2], v[0], v[1], v[2]
                    ),
                );
            }
        }

        let Some((_, handler)) = COMMANDS.iter().find(|(name, _)| *name == envelope.command)
        else {
            return CtlResponse::error(
                "invalid_argument",
                format!("unknown command: {:?}", envelope.command),
            );
        };

        debug!(command = %envelope.command, "dispatching");
        match handler(self, &request) {
            Ok(data) => CtlResponse::ok(data),
            Err(err) => CtlResponse::error(error_code(&err), err.to_string()),
        }
    }
}

fn params<T: serde::de::DeserializeOwned>(request: &Value) -> mapper::Result<T> {
    serde_json::from_value(request.clone())
        .map_err(|err| MapError::InvalidArgument(format!("bad parameters: {}", err)))
}

fn device_info(device: &mapper::MappedDevice) -> DeviceInfo {
    let tables = device.tables();
    DeviceInfo {
        name: device.name(),
        uuid: device.uuid(),
        minor: device.minor(),
        open_count: device.open_count(),
        suspended: device.suspended(),
        active_present: tables.target_count(TableSlot::Active) > 0,
        inactive_present: tables.target_count(TableSlot::Inactive) > 0,
        target_count: tables.target_count(TableSlot::Active),
        size_sectors: device.size_sectors(),
        stats: device.stats().snapshot(),
    }
}

fn cmd_version(_d: &Dispatcher, _request: &Value) -> mapper::Result<Value> {
    Ok(json!({ "version": VERSION }))
}

fn cmd_targets(d: &Dispatcher, _request: &Value) -> mapper::Result<Value> {
    let targets: Vec<Value> = d
        .targets
        .list()
        .into_iter()
        .map(|(name, version)| json!({ "name": name, "version": version }))
        .collect();
    let ciphers: Vec<Value> = d
        .ciphers
        .entries()
        .map(|c| {
            json!({
                "algorithm": c.algorithm(),
                "mode": c.mode(),
                "description": c.description(),
            })
        })
        .collect();
    Ok(json!({ "targets": targets, "ciphers": ciphers }))
}

fn cmd_create(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: CreateParams = params(request)?;
    let device = d.devices.create(&p.name, p.uuid, p.capacity)?;
    Ok(json!({
        "name": device.name(),
        "uuid": device.uuid(),
        "minor": device.minor(),
    }))
}

fn cmd_info(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: DeviceParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    serde_json::to_value(device_info(&device))
        .map_err(|err| MapError::Io(format!("encoding info: {}", err)))
}

fn cmd_names(d: &Dispatcher, _request: &Value) -> mapper::Result<Value> {
    let rows: Vec<DeviceRow> = d
        .devices
        .list()
        .into_iter()
        .map(|device| DeviceRow {
            name: device.name(),
            uuid: device.uuid(),
            minor: device.minor(),
        })
        .collect();
    serde_json::to_value(rows).map_err(|err| MapError::Io(format!("encoding names: {}", err)))
}

fn cmd_suspend(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: DeviceParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    device.suspend();
    Ok(json!({ "minor": device.minor(), "suspended": true }))
}

fn cmd_remove(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: DeviceParams = params(request)?;
    d.devices.remove(&p.selector)?;
    Ok(json!({}))
}

fn cmd_remove_all(d: &Dispatcher, _request: &Value) -> mapper::Result<Value> {
    let removed = d.devices.remove_all();
    Ok(json!({ "removed": removed }))
}

fn cmd_rename(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: RenameParams = params(request)?;
    d.devices.rename(&p.selector, &p.new_name)?;
    let device = d
        .devices
        .lookup(&common::DeviceSelector::by_name(&p.new_name))?;
    Ok(json!({
        "name": device.name(),
        "uuid": device.uuid(),
        "minor": device.minor(),
    }))
}

fn cmd_resume(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: DeviceParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    device.resume()?;
    Ok(json!({
        "minor": device.minor(),
        "suspended": false,
        "size_sectors": device.size_sectors(),
    }))
}

fn cmd_clear(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: DeviceParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    device.tables().clear_inactive();
    Ok(json!({ "minor": device.minor() }))
}

fn cmd_deps(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: QueryParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    let slot = if p.inactive {
        TableSlot::Inactive
    } else {
        TableSlot::Active
    };

    let mut deps: Vec<String> = Vec::new();
    if let Some(table) = device.tables().get(slot) {
        for entry in table.entries() {
            for dep in entry.target.deps() {
                // a store shared by several extents is reported once
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
    }
    Ok(json!({ "deps": deps }))
}

fn cmd_reload(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: ReloadParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    let generation = TableGeneration::from_specs(&d.targets, &p.table)?;
    device.tables().load(generation);
    Ok(json!({
        "minor": device.minor(),
        "inactive_present": true,
    }))
}

fn cmd_status(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: QueryParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    let tables = device.tables();
    let slot = if p.inactive {
        TableSlot::Inactive
    } else {
        TableSlot::Active
    };

    let mut rows: Vec<StatusRow> = Vec::new();
    if let Some(table) = tables.get(slot) {
        for entry in table.entries() {
            rows.push(StatusRow {
                start: entry.start,
                length: entry.length,
                target: entry.target.type_name().to_string(),
                params: if p.table {
                    entry.target.table_params()
                } else {
                    entry.target.info_params()
                },
            });
        }
    }

    Ok(json!({
        "suspended": device.suspended(),
        "active_present": tables.target_count(TableSlot::Active) > 0,
        "inactive_present": tables.target_count(TableSlot::Inactive) > 0,
        "entries": serde_json::to_value(rows)
            .map_err(|err| MapError::Io(format!("encoding status: {}", err)))?,
    }))
}

fn cmd_message(d: &Dispatcher, request: &Value) -> mapper::Result<Value> {
    let p: MessageParams = params(request)?;
    let device = d.devices.lookup(&p.selector)?;
    let table = device.tables().get_active()?;

    let entry = if p.sector == 0 {
        table.entries().first()
    } else {
        table
            .entries()
            .iter()
            .find(|e| p.sector >= e.start && p.sector < e.start + e.length)
    };
    let entry = entry.ok_or_else(|| {
        MapError::InvalidArgument(format!("no extent covers sector {}", p.sector))
    })?;

    let response = entry.target.message(&p.message)?;
    Ok(json!({ "response": response }))
}
