//! Configuration model.
//!
//! Configuration arrives in two parts, both INI: the file passed on the
//! command line selects the sink and the archiving schedule
//! ([`FileConfig`]), while the connection/variable topology is stored in
//! the sink itself and read back at load time ([`Topology`]). The dummy
//! sink reads its topology from `<dir>/<name>.ini` instead.
//!
//! Binding is strict: missing keys, bad numbers and unknown types abort
//! the load without partially mutating anything.

pub mod decrypt;
pub mod ini;

use std::path::PathBuf;

use crate::datatype::DataType;
use crate::error::ConfigError;
use crate::qualifier::{validate_name, Qualifier};
use ini::IniSection;

/// The sink selected by the `type` key of the `[datalogger]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Dummy,
    Sqlite,
    MariaDb,
    MonetDb,
}

impl SinkKind {
    pub fn parse(value: &str) -> Option<SinkKind> {
        match value {
            "dummy" => Some(SinkKind::Dummy),
            "sqlite" => Some(SinkKind::Sqlite),
            "mariadb" => Some(SinkKind::MariaDb),
            "monetdb" => Some(SinkKind::MonetDb),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SinkKind::Dummy => "dummy",
            SinkKind::Sqlite => "sqlite",
            SinkKind::MariaDb => "mariadb",
            SinkKind::MonetDb => "monetdb",
        }
    }
}

/// The `[datalogger]` section.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub kind: SinkKind,
    pub name: String,
    pub dir: PathBuf,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Password used to decrypt encrypted credentials elsewhere in the
    /// configuration.
    pub key: Option<String>,
}

/// The `[dataarchiver]` section.
#[derive(Debug, Clone, Copy)]
pub struct ArchiverConfig {
    /// ISO day of week, 1 = Monday … 7 = Sunday.
    pub day_of_week: u8,
    /// Weeks (or months) between runs.
    pub interval: u32,
    pub monthly: bool,
}

/// IPC server settings from the global (unnamed) section.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub port: u16,
    pub keystore: PathBuf,
    pub keystore_password: String,
    pub truststore: PathBuf,
    pub truststore_password: String,
}

/// The global (unnamed) section: IPC settings plus the shared salt/iv for
/// encrypted credentials.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub ipc: Option<IpcConfig>,
    pub salt: Option<String>,
    pub iv: Option<String>,
}

/// One connection section, by `type` key.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    S7 {
        name: String,
        address: String,
        rack: u16,
        slot: u16,
        sample_ticks: u32,
    },
    ModbusTcp {
        name: String,
        address: String,
        port: u16,
        reversed: bool,
        sample_ticks: u32,
    },
    OpcUa {
        name: String,
        address: String,
        port: u16,
        path: String,
        discovery: bool,
        username: Option<String>,
        password: Option<String>,
        salt: Option<String>,
        iv: Option<String>,
        sample_ticks: u32,
    },
    Json {
        name: String,
        address: String,
        sample_ticks: u32,
    },
    /// A connection polling another jidl logger over its wire protocol.
    Jidl {
        name: String,
        address: String,
        port: u16,
        sample_ticks: u32,
    },
}

impl ConnectionConfig {
    pub fn name(&self) -> &str {
        match self {
            ConnectionConfig::S7 { name, .. }
            | ConnectionConfig::ModbusTcp { name, .. }
            | ConnectionConfig::OpcUa { name, .. }
            | ConnectionConfig::Json { name, .. }
            | ConnectionConfig::Jidl { name, .. } => name,
        }
    }

    pub fn sample_ticks(&self) -> u32 {
        match self {
            ConnectionConfig::S7 { sample_ticks, .. }
            | ConnectionConfig::ModbusTcp { sample_ticks, .. }
            | ConnectionConfig::OpcUa { sample_ticks, .. }
            | ConnectionConfig::Json { sample_ticks, .. }
            | ConnectionConfig::Jidl { sample_ticks, .. } => *sample_ticks,
        }
    }
}

/// A `[var::connection]` section.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub var: String,
    pub connection: String,
    pub address: String,
    pub data_type: DataType,
}

/// A `[var::connection<-srcVar::srcConnection]` section. The data type is
/// inherited from the source reader.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub var: String,
    pub connection: String,
    pub address: String,
    pub source_var: String,
    pub source_connection: String,
}

#[derive(Debug, Clone)]
pub enum VariableConfig {
    Reader(ReaderConfig),
    Writer(WriterConfig),
}

/// The command-line configuration file: sink selection plus the optional
/// archiving schedule.
#[derive(Debug, Clone)]
pub struct FileConfig {
    pub logger: LoggerConfig,
    pub archiver: Option<ArchiverConfig>,
}

impl FileConfig {
    pub fn from_sections(sections: &[IniSection]) -> Result<FileConfig, ConfigError> {
        let mut logger = None;
        let mut archiver = None;

        for section in sections {
            match section.name.as_str() {
                "datalogger" => logger = Some(parse_logger(section)?),
                "dataarchiver" => archiver = Some(parse_archiver(section)?),
                _ => {}
            }
        }

        let logger = logger.ok_or_else(|| ConfigError::MissingKey {
            section: "datalogger".to_string(),
            key: "type".to_string(),
        })?;
        Ok(FileConfig { logger, archiver })
    }
}

/// The topology stored in the sink: global options, connections and
/// variables.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub global: GlobalConfig,
    pub connections: Vec<ConnectionConfig>,
    pub variables: Vec<VariableConfig>,
}

impl Topology {
    pub fn from_sections(sections: &[IniSection]) -> Result<Topology, ConfigError> {
        let mut topology = Topology::default();

        for section in sections {
            if section.name.is_empty() {
                topology.global = parse_global(section)?;
                continue;
            }
            // Skip the file-level sections so one merged INI also loads.
            if section.name == "datalogger" || section.name == "dataarchiver" {
                continue;
            }

            match Qualifier::parse(&section.name)? {
                Qualifier::Connection { .. } => {
                    topology.connections.push(parse_connection(section)?);
                }
                Qualifier::Reader { var, connection } => {
                    topology.variables.push(VariableConfig::Reader(ReaderConfig {
                        var,
                        connection,
                        address: require(section, "address")?.to_string(),
                        data_type: DataType::parse(require(section, "type")?)?,
                    }));
                }
                Qualifier::Writer {
                    var,
                    connection,
                    source_var,
                    source_connection,
                } => {
                    topology.variables.push(VariableConfig::Writer(WriterConfig {
                        var,
                        connection,
                        address: require(section, "address")?.to_string(),
                        source_var,
                        source_connection,
                    }));
                }
            }
        }

        Ok(topology)
    }
}

/// Parses the sample period of a connection section.
///
/// Exactly one of `seconds` and `deciseconds` must be set. Seconds are
/// multiplied by ten (ticks are deciseconds); decisecond periods above 9
/// are rounded to the nearest whole second.
pub fn parse_sample_period(
    section: &str,
    seconds: Option<&str>,
    deciseconds: Option<&str>,
) -> Result<u32, ConfigError> {
    let ticks = match (seconds, deciseconds) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(ConfigError::BadValue {
                section: section.to_string(),
                key: "seconds/deciseconds".to_string(),
                value: "exactly one of the two must be set".to_string(),
            })
        }
        (Some(seconds), None) => 10 * parse_number::<u32>(section, "seconds", seconds)?,
        (None, Some(deciseconds)) => {
            let ds = parse_number::<u32>(section, "deciseconds", deciseconds)?;
            if ds > 9 {
                // Rounded to the nearest second, expressed in deciseconds.
                ((ds as f64 / 10.0).round() as u32) * 10
            } else {
                ds
            }
        }
    };

    if ticks == 0 {
        return Err(ConfigError::BadValue {
            section: section.to_string(),
            key: "seconds/deciseconds".to_string(),
            value: "sample period must be positive".to_string(),
        });
    }
    Ok(ticks)
}

fn parse_logger(section: &IniSection) -> Result<LoggerConfig, ConfigError> {
    let kind_value = require(section, "type")?;
    let kind = SinkKind::parse(kind_value)
        .ok_or_else(|| ConfigError::UnsupportedSink(kind_value.to_string()))?;

    let port = match section.get("port") {
        Some(port) => Some(parse_number::<u16>(&section.name, "port", port)?),
        None => None,
    };

    Ok(LoggerConfig {
        kind,
        name: require(section, "name")?.to_string(),
        dir: PathBuf::from(require(section, "dir")?),
        server: section.get("server").map(str::to_string),
        port,
        username: section.get("username").map(str::to_string),
        password: section.get("password").map(str::to_string),
        key: section.get("key").map(str::to_string),
    })
}

fn parse_archiver(section: &IniSection) -> Result<ArchiverConfig, ConfigError> {
    let day = require(section, "day")?;
    let day_of_week = match day {
        "MONDAY" => 1,
        "TUESDAY" => 2,
        "WEDNESDAY" => 3,
        "THURSDAY" => 4,
        "FRIDAY" => 5,
        "SATURDAY" => 6,
        "SUNDAY" => 7,
        _ => {
            return Err(ConfigError::BadValue {
                section: section.name.clone(),
                key: "day".to_string(),
                value: day.to_string(),
            })
        }
    };

    Ok(ArchiverConfig {
        day_of_week,
        interval: parse_number(&section.name, "interval", require(section, "interval")?)?,
        monthly: parse_bool(section.get("monthly")),
    })
}

fn parse_global(section: &IniSection) -> Result<GlobalConfig, ConfigError> {
    let ipc = match (
        section.get("ipc_port"),
        section.get("ipc_keystore"),
        section.get("ipc_keystorepw"),
        section.get("ipc_truststore"),
        section.get("ipc_truststorepw"),
    ) {
        (Some(port), Some(keystore), Some(keystore_pw), Some(truststore), Some(truststore_pw)) => {
            Some(IpcConfig {
                port: parse_number(&section.name, "ipc_port", port)?,
                keystore: PathBuf::from(keystore),
                keystore_password: keystore_pw.to_string(),
                truststore: PathBuf::from(truststore),
                truststore_password: truststore_pw.to_string(),
            })
        }
        _ => None,
    };

    Ok(GlobalConfig {
        ipc,
        salt: section.get("salt").map(str::to_string),
        iv: section.get("iv").map(str::to_string),
    })
}

fn parse_connection(section: &IniSection) -> Result<ConnectionConfig, ConfigError> {
    let name = validate_name(&section.name)?.to_string();
    let sample_ticks =
        parse_sample_period(&section.name, section.get("seconds"), section.get("deciseconds"))?;
    let kind = require(section, "type")?;

    match kind {
        "s7" => Ok(ConnectionConfig::S7 {
            address: require(section, "address")?.to_string(),
            rack: parse_number(&section.name, "rack", require(section, "rack")?)?,
            slot: parse_number(&section.name, "slot", require(section, "slot")?)?,
            name,
            sample_ticks,
        }),
        "modbus-tcp" => Ok(ConnectionConfig::ModbusTcp {
            address: require(section, "address")?.to_string(),
            port: parse_number(&section.name, "port", require(section, "port")?)?,
            reversed: parse_bool(section.get("reversed")),
            name,
            sample_ticks,
        }),
        "opcua" => Ok(ConnectionConfig::OpcUa {
            address: require(section, "address")?.to_string(),
            port: parse_number(&section.name, "port", require(section, "port")?)?,
            path: section.get("path").unwrap_or_default().to_string(),
            discovery: parse_bool(section.get("discovery")),
            username: section.get("username").map(str::to_string),
            password: section.get("password").map(str::to_string),
            salt: section.get("salt").map(str::to_string),
            iv: section.get("iv").map(str::to_string),
            name,
            sample_ticks,
        }),
        "json" => Ok(ConnectionConfig::Json {
            address: require(section, "address")?.to_string(),
            name,
            sample_ticks,
        }),
        "jidl" => Ok(ConnectionConfig::Jidl {
            address: require(section, "address")?.to_string(),
            port: parse_number(&section.name, "port", require(section, "port")?)?,
            name,
            sample_ticks,
        }),
        other => Err(ConfigError::BadValue {
            section: section.name.clone(),
            key: "type".to_string(),
            value: other.to_string(),
        }),
    }
}

fn require<'a>(section: &'a IniSection, key: &str) -> Result<&'a str, ConfigError> {
    section.get(key).ok_or_else(|| ConfigError::MissingKey {
        section: section.name.clone(),
        key: key.to_string(),
    })
}

fn parse_number<T: core::str::FromStr>(
    section: &str,
    key: &str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::BadValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
