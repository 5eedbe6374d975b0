//! Flat "key: value" records handed off between the provisioning stages.

mod repository;

pub use repository::{FsRepository, StateRepository};

use std::{fs, path::Path, str::FromStr};

use crate::{
    errors::{self, Result},
    random::BaseAddress,
};

/// Separates keys from values in the state files.
const SEPARATOR: char = ':';

/// Distinguishes network records from instance records.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Kind {
    Network,
    Instance,
}

impl Kind {
    /// Returns the file name prefix of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Kind::Network => "network",
            Kind::Instance => "instance",
        }
    }
}

/// File suffix shared by all state files.
pub const FILE_SUFFIX: &str = ".state";

/// Timestamp layout embedded in the file name, sortable as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_at_%H-%M-%S";

/// Returns the file name for a record of "kind" created at "now".
pub fn file_name(kind: Kind, now: chrono::NaiveDateTime) -> String {
    numbered_file_name(kind, now, 0)
}

/// Returns the file name for the "attempt"-th record of "kind" created
/// within the same second. Attempt 0 has no counter. Later ones get "_NN"
/// and sort after it, since '.' orders before '_'.
pub fn numbered_file_name(kind: Kind, now: chrono::NaiveDateTime, attempt: u32) -> String {
    if attempt == 0 {
        return format!(
            "{}_{}{}",
            kind.as_str(),
            now.format(TIMESTAMP_FORMAT),
            FILE_SUFFIX
        );
    }
    format!(
        "{}_{}_{:02}{}",
        kind.as_str(),
        now.format(TIMESTAMP_FORMAT),
        attempt,
        FILE_SUFFIX
    )
}

/// Ordered "key: value" pairs.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Record {
    entries: Vec<(String, String)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value, replacing an existing key in place.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the value or a configuration error naming the key.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(errors::config(format!("missing required key '{}'", key))),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes one "key: value" line per entry.
    pub fn encode(&self) -> String {
        let mut s = String::new();
        for (k, v) in self.entries.iter() {
            s.push_str(k);
            s.push_str(": ");
            s.push_str(v);
            s.push('\n');
        }
        s
    }

    /// Decodes "key: value" lines.
    /// Keys and values are trimmed, blank lines are skipped,
    /// and a repeated key keeps its last value.
    pub fn decode(contents: &str) -> Result<Self> {
        let mut record = Record::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let (k, v) = line.split_once(SEPARATOR).ok_or_else(|| {
                errors::config(format!("malformed line {} '{}' (expected 'key: value')", i + 1, line))
            })?;
            let k = k.trim();
            if k.is_empty() {
                return Err(errors::config(format!("empty key on line {}", i + 1)));
            }
            record.insert(k, v.trim());
        }
        Ok(record)
    }

    /// Loads a record from disk.
    pub fn load(file_path: &Path) -> Result<Self> {
        log::info!("loading state from '{}'", file_path.display());
        if !file_path.exists() {
            return Err(errors::config(format!(
                "state file '{}' does not exist",
                file_path.display()
            )));
        }
        let contents = fs::read_to_string(file_path).map_err(|e| {
            errors::config(format!("failed to read '{}' ({})", file_path.display(), e))
        })?;
        Self::decode(&contents).map_err(|e| {
            errors::config(format!("state file '{}': {}", file_path.display(), e.message()))
        })
    }
}

/// Represents one successful network provisioning run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NetworkState {
    pub label: String,
    pub base_ip: BaseAddress,
    pub vpc_id: String,
    pub vpc_label: String,
    pub subnet_id: String,
    pub sg_id: String,
    pub sg_label: String,

    pub region: Option<String>,
    pub availability_zone: Option<String>,
    pub dhcp_options_id: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub route_table_id: Option<String>,
}

impl NetworkState {
    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("label", self.label.as_str());
        r.insert("base_ip", self.base_ip.to_string());
        r.insert("vpc_id", self.vpc_id.as_str());
        r.insert("vpc_label", self.vpc_label.as_str());
        r.insert("subnet_id", self.subnet_id.as_str());
        r.insert("sg_id", self.sg_id.as_str());
        r.insert("sg_label", self.sg_label.as_str());
        for (k, v) in [
            ("region", &self.region),
            ("availability_zone", &self.availability_zone),
            ("dhcp_options_id", &self.dhcp_options_id),
            ("internet_gateway_id", &self.internet_gateway_id),
            ("route_table_id", &self.route_table_id),
        ] {
            if let Some(v) = v {
                r.insert(k, v.as_str());
            }
        }
        r
    }

    pub fn from_record(r: &Record) -> Result<Self> {
        let optional = |k: &str| r.get(k).filter(|v| !v.is_empty()).map(String::from);
        Ok(Self {
            label: r.require("label")?.to_string(),
            base_ip: BaseAddress::from_str(r.require("base_ip")?)?,
            vpc_id: r.require("vpc_id")?.to_string(),
            vpc_label: r.require("vpc_label")?.to_string(),
            subnet_id: r.require("subnet_id")?.to_string(),
            sg_id: r.require("sg_id")?.to_string(),
            sg_label: r.require("sg_label")?.to_string(),

            region: optional("region"),
            availability_zone: optional("availability_zone"),
            dhcp_options_id: optional("dhcp_options_id"),
            internet_gateway_id: optional("internet_gateway_id"),
            route_table_id: optional("route_table_id"),
        })
    }
}

/// Represents one spy launch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InstanceState {
    pub network_interface_id: String,
    pub private_ip: String,
    pub vpc_id: String,

    pub instance_id: String,
    pub label: String,
}

impl InstanceState {
    pub fn to_record(&self) -> Record {
        let mut r = Record::new();
        r.insert("network_interface_id", self.network_interface_id.as_str());
        r.insert("private_ip", self.private_ip.as_str());
        r.insert("vpc_id", self.vpc_id.as_str());
        r.insert("instance_id", self.instance_id.as_str());
        r.insert("label", self.label.as_str());
        r
    }

    pub fn from_record(r: &Record) -> Result<Self> {
        Ok(Self {
            network_interface_id: r.require("network_interface_id")?.to_string(),
            private_ip: r.require("private_ip")?.to_string(),
            vpc_id: r.require("vpc_id")?.to_string(),
            instance_id: r.get("instance_id").unwrap_or_default().to_string(),
            label: r.get("label").unwrap_or_default().to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_network_state() -> NetworkState {
    NetworkState {
        label: String::from("ab1cd"),
        base_ip: BaseAddress::from_str("10.42.0.0").unwrap(),
        vpc_id: String::from("vpc-0123"),
        vpc_label: String::from("ab1cd_vpc"),
        subnet_id: String::from("subnet-0123"),
        sg_id: String::from("sg-0123"),
        sg_label: String::from("ab1cd_sg"),
        region: Some(String::from("us-west-1")),
        availability_zone: Some(String::from("us-west-1a")),
        dhcp_options_id: None,
        internet_gateway_id: Some(String::from("igw-0123")),
        route_table_id: Some(String::from("rtb-0123")),
    }
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- state::test_decode --exact --show-output
#[test]
fn test_decode() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = "label: ab1cd\nbase_ip: 10.42.0.0   \n\nvpc_id:vpc-0123\nsg_label:   ab1cd_sg\t\n";
    let r = Record::decode(contents).unwrap();
    assert_eq!(r.len(), 4);
    assert_eq!(r.get("label"), Some("ab1cd"));
    assert_eq!(r.get("base_ip"), Some("10.42.0.0"));
    assert_eq!(r.get("vpc_id"), Some("vpc-0123"));
    assert_eq!(r.get("sg_label"), Some("ab1cd_sg"));
    assert_eq!(r.get("sg_id"), None);

    // values keep everything after the first separator
    let r = Record::decode("endpoint: http://10.42.0.5:8080\n").unwrap();
    assert_eq!(r.get("endpoint"), Some("http://10.42.0.5:8080"));

    let r = Record::decode("a: 1\na: 2\n").unwrap();
    assert_eq!(r.len(), 1);
    assert_eq!(r.get("a"), Some("2"));

    let e = Record::decode("label ab1cd\n").unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("line 1"));
}

#[test]
fn test_encode_decode() {
    let state = sample_network_state();
    let record = state.to_record();
    let encoded = record.encode();
    assert!(encoded.starts_with("label: ab1cd\nbase_ip: 10.42.0.0\n"));
    assert!(encoded.ends_with('\n'));
    assert!(!encoded.contains("dhcp_options_id"));

    let decoded = Record::decode(&encoded).unwrap();
    assert_eq!(decoded, record);
    assert_eq!(NetworkState::from_record(&decoded).unwrap(), state);

    let instance = InstanceState {
        network_interface_id: String::from("eni-0123"),
        private_ip: String::from("10.42.0.111"),
        vpc_id: String::from("vpc-0123"),
        instance_id: String::from("i-0123"),
        label: String::from("ab1cd"),
    };
    let decoded = Record::decode(&instance.to_record().encode()).unwrap();
    assert_eq!(InstanceState::from_record(&decoded).unwrap(), instance);
}

#[test]
fn test_network_state_missing_key() {
    let mut record = sample_network_state().to_record();
    let encoded = record
        .encode()
        .lines()
        .filter(|l| !l.starts_with("sg_id"))
        .collect::<Vec<_>>()
        .join("\n");
    let decoded = Record::decode(&encoded).unwrap();
    let e = NetworkState::from_record(&decoded).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("'sg_id'"));

    record.insert("base_ip", "not-an-ip");
    let e = NetworkState::from_record(&record).unwrap_err();
    assert!(e.is_config());

    // files without the optional keys still load
    let minimal = "label: ab1cd\nbase_ip: 10.42.0.0\nvpc_id: vpc-1\nvpc_label: ab1cd_vpc\nsubnet_id: subnet-1\nsg_id: sg-1\nsg_label: ab1cd_sg\n";
    let state = NetworkState::from_record(&Record::decode(minimal).unwrap()).unwrap();
    assert_eq!(state.region, None);
    assert_eq!(state.route_table_id, None);
}

#[test]
fn test_load_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let e = Record::load(&dir.path().join("network_2024-01-01_at_00-00-00.state")).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("does not exist"));
}

#[test]
fn test_file_name() {
    let now = chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(13, 5, 9)
        .unwrap();
    assert_eq!(
        file_name(Kind::Network, now),
        "network_2024-06-01_at_13-05-09.state"
    );
    assert_eq!(
        file_name(Kind::Instance, now),
        "instance_2024-06-01_at_13-05-09.state"
    );
    assert_eq!(
        numbered_file_name(Kind::Network, now, 2),
        "network_2024-06-01_at_13-05-09_02.state"
    );

    let mut names = vec![
        numbered_file_name(Kind::Network, now, 1),
        file_name(Kind::Network, now + chrono::Duration::seconds(1)),
        file_name(Kind::Network, now),
    ];
    names.sort();
    assert_eq!(
        names,
        vec![
            "network_2024-06-01_at_13-05-09.state",
            "network_2024-06-01_at_13-05-09_01.state",
            "network_2024-06-01_at_13-05-10.state",
        ]
    );
}
