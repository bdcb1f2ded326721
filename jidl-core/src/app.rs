//! Application assembly.
//!
//! [`App::load`] turns a configuration file into a ready [`DataLogger`]:
//! it selects the sink, reads the stored topology back from it, builds
//! every connection and variable, provisions the sink tables, and
//! attaches the archiver and the IPC server when configured. Nothing here
//! is process-global; the caller owns the `App` and its lifecycle.
//!
//! Sink construction is injected through [`SinkFactory`] so the engine
//! does not depend on concrete database crates, and the PLC transports
//! come from a [`DriverCatalog`] for the same reason — with no catalog,
//! PLC connection types fail the load with [`ConfigError::NoDriver`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::decrypt::Decrypter;
use crate::config::ini;
use crate::config::{
    ConnectionConfig, FileConfig, GlobalConfig, LoggerConfig, Topology, VariableConfig,
};
use crate::connection::{Connection, ConnectionKind};
use crate::datatype::DataType;
use crate::device::ipc::IpcDeviceClient;
use crate::device::json_http::JsonHttpClient;
use crate::device::modbus::{ModbusAddress, ModbusClient, RegisterIo};
use crate::device::plc::{PlcClient, PlcTag, TagIo};
use crate::device::{share, SharedClient};
use crate::error::{ConfigError, LoggerError};
use crate::logger::DataLogger;
use crate::qualifier::Qualifier;
use crate::sink::Sink;
use crate::variable::{TagAddress, TagReader, TagWriter, ValueCell};

/// Builds the sink selected by the `[datalogger]` section.
pub type SinkFactory = dyn Fn(&LoggerConfig) -> Result<Arc<dyn Sink>, ConfigError> + Send + Sync;

/// Supplies the concrete PLC transports. The engine ships none; every
/// method defaults to [`ConfigError::NoDriver`].
pub trait DriverCatalog: Send + Sync {
    fn modbus(&self, _address: &str, _port: u16) -> Result<Box<dyn RegisterIo>, ConfigError> {
        Err(ConfigError::NoDriver("modbus-tcp".to_string()))
    }

    fn s7(&self, _address: &str, _rack: u16, _slot: u16) -> Result<Box<dyn TagIo>, ConfigError> {
        Err(ConfigError::NoDriver("s7".to_string()))
    }

    fn opc_ua(
        &self,
        _address: &str,
        _port: u16,
        _path: &str,
        _discovery: bool,
        _username: Option<&str>,
        _password: Option<&str>,
    ) -> Result<Box<dyn TagIo>, ConfigError> {
        Err(ConfigError::NoDriver("opcua".to_string()))
    }
}

/// The empty driver catalog.
pub struct NoDrivers;

impl DriverCatalog for NoDrivers {}

/// Runtime flags from the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppOptions {
    /// Start logging right after a successful load.
    pub autostart: bool,
    /// Allow `start`/`stop` over IPC.
    pub remote_control: bool,
}

/// A fully assembled logger with its runtime flags.
pub struct App {
    pub logger: Arc<DataLogger>,
    pub options: AppOptions,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

impl App {
    /// Loads the configuration file and assembles the logger.
    pub async fn load(
        config_path: &Path,
        options: AppOptions,
        sink_factory: &SinkFactory,
        drivers: &dyn DriverCatalog,
    ) -> Result<App, ConfigError> {
        let text = std::fs::read_to_string(config_path)?;
        let file = FileConfig::from_sections(&ini::parse(&text))?;
        if !file.logger.dir.is_dir() {
            return Err(ConfigError::NotADirectory(
                file.logger.dir.display().to_string(),
            ));
        }

        let sink = sink_factory(&file.logger)?;
        let decrypter = Decrypter::new(file.logger.key.clone());
        let mut logger = DataLogger::new(&file.logger.name, sink.clone());

        // The topology lives in the sink.
        sink.open().await?;
        let topology = Topology::from_sections(&sink.configuration().await?)?;

        for connection in build_connections(&topology, &decrypter, drivers)? {
            logger.add_connection(Arc::new(connection)).map_err(|e| match e {
                LoggerError::DuplicateConnection(name) => ConfigError::DuplicateConnection(name),
                other => ConfigError::BadValue {
                    section: String::new(),
                    key: "connection".to_string(),
                    value: other.to_string(),
                },
            })?;
        }

        let logger = logger.shared();
        logger.ensure_tables().await?;

        // Best-effort early driver setup; failures retry on the first
        // due tick.
        for connection in logger.connections() {
            if let Err(e) = connection.initialize().await {
                tracing::warn!("{}: initialization deferred: {e}", connection.name());
            }
        }

        if let Some(archiver) = file.archiver {
            logger
                .set_archiving_service(archiver.day_of_week, archiver.interval, archiver.monthly)
                .await
                .map_err(|e| ConfigError::BadValue {
                    section: "dataarchiver".to_string(),
                    key: "day/interval".to_string(),
                    value: e.to_string(),
                })?;
        }

        if let Some(ipc) = &topology.global.ipc {
            let salt = topology.global.salt.as_deref();
            let iv = topology.global.iv.as_deref();
            // The passwords decrypt for configuration compatibility; the
            // PEM material itself is expected unencrypted.
            decrypter.decrypt(&ipc.keystore_password, salt, iv)?;
            decrypter.decrypt(&ipc.truststore_password, salt, iv)?;

            let tls = jidl_ipc::ServerTlsConfig::from_pem_files(&ipc.keystore, &ipc.truststore)?;
            logger
                .add_ipc_server(ipc.port, options.remote_control, tls)
                .await
                .map_err(|e| match e {
                    LoggerError::Protocol(p) => ConfigError::Protocol(p),
                    other => ConfigError::BadValue {
                        section: String::new(),
                        key: "ipc_port".to_string(),
                        value: other.to_string(),
                    },
                })?;
        }

        // Everything starts from a clean, stopped state.
        logger.stop().await;

        Ok(App { logger, options })
    }

    /// The shutdown path shared by Ctrl-C and `q`.
    pub async fn shutdown(&self) {
        if self.logger.status() {
            self.logger.stop().await;
        }
        if self.logger.ipc_status().await {
            self.logger.stop_ipc_server().await;
        }
        if self.logger.is_archiver() && self.logger.is_archiver_set().await {
            self.logger.stop_archiving_service().await;
        }
    }
}

/// Per-connection context for parsing tag addresses.
enum AddressContext {
    Modbus { reversed: bool },
    Plc,
    Json,
    Remote,
}

fn build_connections(
    topology: &Topology,
    decrypter: &Decrypter,
    drivers: &dyn DriverCatalog,
) -> Result<Vec<Connection>, ConfigError> {
    let mut connections: Vec<(Connection, AddressContext)> = Vec::new();

    for config in &topology.connections {
        if connections.iter().any(|(c, _)| c.name() == config.name()) {
            return Err(ConfigError::DuplicateConnection(config.name().to_string()));
        }
        let built = build_connection(config, &topology.global, decrypter, drivers, &connections)?;
        connections.push(built);
    }

    // Readers first: their cells are the writer sources.
    let mut cells: HashMap<String, (ValueCell, DataType)> = HashMap::new();
    for variable in &topology.variables {
        if let VariableConfig::Reader(reader) = variable {
            let (connection, context) = connections
                .iter_mut()
                .find(|(c, _)| c.name() == reader.connection)
                .ok_or_else(|| ConfigError::NoSuchConnection(reader.connection.clone()))?;
            let address = make_address(context, &reader.address, reader.data_type)?;
            let tag = TagReader::new(&reader.var, address, reader.data_type)?;
            let cell = connection.add_reader(tag)?;
            cells.insert(
                format!("{}::{}", reader.var, reader.connection),
                (cell, reader.data_type),
            );
        }
    }

    for variable in &topology.variables {
        if let VariableConfig::Writer(writer) = variable {
            let source_key = format!("{}::{}", writer.source_var, writer.source_connection);
            let (cell, data_type) = cells
                .get(&source_key)
                .cloned()
                .ok_or_else(|| ConfigError::BadWriterSource(source_key.clone()))?;

            let (connection, context) = connections
                .iter_mut()
                .find(|(c, _)| c.name() == writer.connection)
                .ok_or_else(|| ConfigError::NoSuchConnection(writer.connection.clone()))?;
            let address = make_address(context, &writer.address, data_type)?;
            let tag = TagWriter::new(&writer.var, address, cell, data_type)?;
            connection.add_writer(tag)?;
        }
    }

    Ok(connections.into_iter().map(|(c, _)| c).collect())
}

fn build_connection(
    config: &ConnectionConfig,
    global: &GlobalConfig,
    decrypter: &Decrypter,
    drivers: &dyn DriverCatalog,
    built: &[(Connection, AddressContext)],
) -> Result<(Connection, AddressContext), ConfigError> {
    match config {
        ConnectionConfig::ModbusTcp {
            name,
            address,
            port,
            reversed,
            sample_ticks,
        } => {
            let endpoint = format!("modbus-tcp:tcp://{address}:{port}");
            let client = shared_or_new(built, ConnectionKind::ModbusTcp, &endpoint, || {
                Ok(share(Box::new(ModbusClient::new(
                    endpoint.clone(),
                    drivers.modbus(address, *port)?,
                ))))
            })?;
            let connection = Connection::new(
                name,
                ConnectionKind::ModbusTcp,
                endpoint,
                *sample_ticks,
                vec![
                    ("ip address".to_string(), address.clone()),
                    ("port".to_string(), port.to_string()),
                    ("order".to_string(), reversed.to_string()),
                ],
                client,
            )?;
            Ok((connection, AddressContext::Modbus { reversed: *reversed }))
        }

        ConnectionConfig::S7 {
            name,
            address,
            rack,
            slot,
            sample_ticks,
        } => {
            let endpoint = format!("s7://{address}?remote-rack={rack}&remote-slot={slot}");
            let client = shared_or_new(built, ConnectionKind::S7, &endpoint, || {
                Ok(share(Box::new(PlcClient::new(
                    endpoint.clone(),
                    drivers.s7(address, *rack, *slot)?,
                ))))
            })?;
            let connection = Connection::new(
                name,
                ConnectionKind::S7,
                endpoint,
                *sample_ticks,
                vec![
                    ("ip address".to_string(), address.clone()),
                    ("rack".to_string(), rack.to_string()),
                    ("slot".to_string(), slot.to_string()),
                ],
                client,
            )?;
            Ok((connection, AddressContext::Plc))
        }

        ConnectionConfig::OpcUa {
            name,
            address,
            port,
            path,
            discovery,
            username,
            password,
            salt,
            iv,
            sample_ticks,
        } => {
            let endpoint = format!("opc.tcp://{address}:{port}/{path}");
            let password = match password {
                Some(password) => {
                    Some(decrypter.decrypt(password, salt.as_deref(), iv.as_deref())?)
                }
                None => None,
            };
            let io = drivers.opc_ua(
                address,
                *port,
                path,
                *discovery,
                username.as_deref(),
                password.as_deref(),
            )?;
            let connection = Connection::new(
                name,
                ConnectionKind::OpcUa,
                endpoint.clone(),
                *sample_ticks,
                vec![
                    ("ip address".to_string(), address.clone()),
                    ("port".to_string(), port.to_string()),
                    ("path".to_string(), path.clone()),
                ],
                share(Box::new(PlcClient::new(endpoint, io))),
            )?;
            Ok((connection, AddressContext::Plc))
        }

        ConnectionConfig::Json {
            name,
            address,
            sample_ticks,
        } => {
            let connection = Connection::new(
                name,
                ConnectionKind::Json,
                address.clone(),
                *sample_ticks,
                vec![("url".to_string(), address.clone())],
                share(Box::new(JsonHttpClient::new(address.clone()))),
            )?;
            Ok((connection, AddressContext::Json))
        }

        ConnectionConfig::Jidl {
            name,
            address,
            port,
            sample_ticks,
        } => {
            // The client side reuses the logger's own IPC material from
            // the global section.
            let ipc = global.ipc.as_ref().ok_or_else(|| ConfigError::MissingKey {
                section: String::new(),
                key: "ipc_keystore".to_string(),
            })?;
            let tls =
                jidl_ipc::ClientTlsConfig::from_pem_files(&ipc.keystore, &ipc.truststore)?;
            // The remote gets at most one sample period to answer.
            let timeout_ms = *sample_ticks as u64 * 100;
            let client = IpcDeviceClient::new(address.clone(), *port, timeout_ms, tls)?;

            let connection = Connection::new(
                name,
                ConnectionKind::Jidl,
                format!("{address}:{port}"),
                *sample_ticks,
                vec![
                    ("address".to_string(), address.clone()),
                    ("port".to_string(), port.to_string()),
                ],
                share(Box::new(client)),
            )?;
            Ok((connection, AddressContext::Remote))
        }
    }
}

/// Reuses the client of an earlier shareable connection to the same
/// device, or builds a fresh one.
fn shared_or_new(
    built: &[(Connection, AddressContext)],
    kind: ConnectionKind,
    endpoint: &str,
    make: impl FnOnce() -> Result<SharedClient, ConfigError>,
) -> Result<SharedClient, ConfigError> {
    if kind.is_shareable() {
        if let Some((existing, _)) = built
            .iter()
            .find(|(c, _)| c.kind() == kind && c.address() == endpoint)
        {
            tracing::debug!("sharing the {endpoint} client with {}", existing.name());
            return Ok(existing.client());
        }
    }
    make()
}

fn make_address(
    context: &AddressContext,
    address: &str,
    data_type: DataType,
) -> Result<TagAddress, ConfigError> {
    match context {
        AddressContext::Modbus { reversed } => Ok(TagAddress::Modbus(ModbusAddress::parse(
            address, data_type, *reversed,
        )?)),
        AddressContext::Plc => Ok(TagAddress::Plc(PlcTag::new(address, data_type)?)),
        AddressContext::Json => Ok(TagAddress::JsonKey(address.to_string())),
        AddressContext::Remote => match Qualifier::parse(address)? {
            Qualifier::Reader { var, connection } => Ok(TagAddress::Remote { var, connection }),
            _ => Err(ConfigError::BadAddress(address.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::DummySink;

    fn dummy_factory() -> Box<SinkFactory> {
        Box::new(|config: &LoggerConfig| {
            Ok(Arc::new(DummySink::new(&config.name, config.dir.clone())) as Arc<dyn Sink>)
        })
    }

    async fn load_app(config: &str, topology: &str) -> Result<App, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let config = config.replace("{dir}", &dir.path().display().to_string());
        let config_path = dir.path().join("jidl.ini");
        std::fs::write(&config_path, config).unwrap();
        std::fs::write(dir.path().join("t.ini"), topology).unwrap();

        let factory = dummy_factory();
        App::load(&config_path, AppOptions::default(), &factory, &NoDrivers).await
    }

    #[tokio::test]
    async fn loads_a_dummy_logger_with_one_json_connection() {
        let app = load_app(
            "[datalogger]\ntype=dummy\nname=t\ndir={dir}\n",
            "[c]\ntype=json\naddress=http://127.0.0.1:8080/json\nseconds=1\n\
             [x::c]\naddress=foo\ntype=INTEGER\n",
        )
        .await
        .unwrap();

        assert_eq!(app.logger.connections().len(), 1);
        let connection = app.logger.connection_by_name("c").unwrap();
        assert_eq!(connection.kind(), ConnectionKind::Json);
        assert_eq!(connection.sample_ticks(), 10);
        assert_eq!(connection.reader_names().await, ["x"]);
        assert!(!app.logger.status());
    }

    #[tokio::test]
    async fn unknown_reader_connection_fails_the_load() {
        let err = load_app(
            "[datalogger]\ntype=dummy\nname=t\ndir={dir}\n",
            "[x::nope]\naddress=foo\ntype=INTEGER\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoSuchConnection(name) if name == "nope"));
    }

    #[tokio::test]
    async fn writer_without_source_fails_the_load() {
        let err = load_app(
            "[datalogger]\ntype=dummy\nname=t\ndir={dir}\n",
            "[c]\ntype=json\naddress=http://127.0.0.1:8080/json\nseconds=1\n\
             [y::c<-missing::c]\naddress=bar\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::BadWriterSource(_)));
    }

    #[tokio::test]
    async fn plc_connections_need_a_driver() {
        let err = load_app(
            "[datalogger]\ntype=dummy\nname=t\ndir={dir}\n",
            "[m]\ntype=modbus-tcp\naddress=192.168.0.9\nport=502\nreversed=false\nseconds=1\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConfigError::NoDriver(kind) if kind == "modbus-tcp"));
    }

    struct FakeModbus;

    impl RegisterIo for FakeModbus {
        fn open(&mut self) -> crate::device::BoxFuture<'_, Result<(), crate::error::DeviceError>> {
            Box::pin(async { Ok(()) })
        }
        fn connect(&mut self) -> crate::device::BoxFuture<'_, Result<(), crate::error::DeviceError>> {
            Box::pin(async { Ok(()) })
        }
        fn disconnect(&mut self) -> crate::device::BoxFuture<'_, ()> {
            Box::pin(async {})
        }
        fn read_bits(
            &mut self,
            _file: crate::device::modbus::ModbusFile,
            _offset: u32,
            count: u16,
        ) -> crate::device::BoxFuture<'_, Result<Vec<bool>, crate::error::DeviceError>> {
            Box::pin(async move { Ok(vec![false; count as usize]) })
        }
        fn read_registers(
            &mut self,
            _file: crate::device::modbus::ModbusFile,
            _offset: u32,
            count: u16,
        ) -> crate::device::BoxFuture<'_, Result<Vec<u16>, crate::error::DeviceError>> {
            Box::pin(async move { Ok(vec![0; count as usize]) })
        }
        fn write_bits(
            &mut self,
            _file: crate::device::modbus::ModbusFile,
            _offset: u32,
            _bits: Vec<bool>,
        ) -> crate::device::BoxFuture<'_, Result<(), crate::error::DeviceError>> {
            Box::pin(async { Ok(()) })
        }
        fn write_registers(
            &mut self,
            _file: crate::device::modbus::ModbusFile,
            _offset: u32,
            _words: Vec<u16>,
        ) -> crate::device::BoxFuture<'_, Result<(), crate::error::DeviceError>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct TestDrivers;

    impl DriverCatalog for TestDrivers {
        fn modbus(&self, _address: &str, _port: u16) -> Result<Box<dyn RegisterIo>, ConfigError> {
            Ok(Box::new(FakeModbus))
        }
    }

    #[tokio::test]
    async fn same_address_modbus_connections_share_one_client() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("jidl.ini");
        std::fs::write(
            &config_path,
            format!(
                "[datalogger]\ntype=dummy\nname=t\ndir={}\n",
                dir.path().display()
            ),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("t.ini"),
            "[m1]\ntype=modbus-tcp\naddress=192.168.0.9\nport=502\nreversed=false\nseconds=1\n\
             [m2]\ntype=modbus-tcp\naddress=192.168.0.9\nport=502\nreversed=false\nseconds=2\n\
             [m3]\ntype=modbus-tcp\naddress=192.168.0.9\nport=503\nreversed=false\nseconds=1\n",
        )
        .unwrap();

        let factory = dummy_factory();
        let app = App::load(&config_path, AppOptions::default(), &factory, &TestDrivers)
            .await
            .unwrap();

        let m1 = app.logger.connection_by_name("m1").unwrap();
        let m2 = app.logger.connection_by_name("m2").unwrap();
        let m3 = app.logger.connection_by_name("m3").unwrap();
        assert!(
            Arc::ptr_eq(&m1.client(), &m2.client()),
            "same device, one client"
        );
        assert!(
            !Arc::ptr_eq(&m1.client(), &m3.client()),
            "different port, different client"
        );
    }

    #[tokio::test]
    async fn missing_directory_fails_the_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("jidl.ini");
        std::fs::write(&config_path, "[datalogger]\ntype=dummy\nname=t\ndir=/nope/nothing\n")
            .unwrap();
        let factory = dummy_factory();
        let err = App::load(&config_path, AppOptions::default(), &factory, &NoDrivers)
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotADirectory(_)));
    }
}
