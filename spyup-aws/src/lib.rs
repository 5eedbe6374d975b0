pub mod aws;
pub mod errors;
pub mod ingress;
pub mod launch;
pub mod outcome;
pub mod prompt;
pub mod provision;
pub mod random;
pub mod state;
#[cfg(test)]
pub(crate) mod testing;

use std::{
    fs::{self, File},
    io::{self, stdout, Error, ErrorKind, Write},
    path::Path,
};

use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION: &str = "us-west-1";
pub const DEFAULT_IMAGE_ID: &str = "ami-07585467";
pub const DEFAULT_INSTANCE_TYPE: &str = "t2.micro";
pub const DEFAULT_USER_DATA_FILE: &str = "user_data.sh";
pub const DEFAULT_PORTS: [i32; 6] = [22, 27017, 8081, 19999, 9090, 3000];

/// Operator settings shared by "provision-network" and "launch-spy".
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Spec {
    /// User-provided ID of the spec.
    /// Only used to name the spec file.
    #[serde(default)]
    pub id: String,

    /// AWS region to create resources.
    /// MUST BE NON-EMPTY.
    #[serde(default)]
    pub region: String,
    /// Availability zone of the subnet and the spy instance.
    /// MUST BE IN "region".
    #[serde(default)]
    pub availability_zone: String,
    /// Domain name handed out by the VPC DHCP options.
    #[serde(default)]
    pub domain_name: String,

    /// Directory of the network and instance state files.
    #[serde(default)]
    pub state_dir: String,
    /// Deletes what a failed run created, unless set "false".
    #[serde(default = "default_rollback")]
    pub rollback_on_failure: bool,

    pub ingress: ingress::Ingress,
    pub spy: Spy,
}

fn default_rollback() -> bool {
    true
}

/// Defines the spy instance.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Spy {
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub instance_type: String,
    /// EC2 key pair name for SSH access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Boot script passed as user data.
    /// MUST start with an interpreter line (e.g., "#!/bin/bash").
    #[serde(default)]
    pub user_data_file: String,

    #[serde(default)]
    pub volume_device_name: String,
    #[serde(default)]
    pub volume_size_in_gb: i32,
    #[serde(default)]
    pub volume_type: String,

    #[serde(default)]
    pub interface_mode: aws::InterfaceMode,
}

/// Defines "default-spec" option.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
pub struct DefaultSpecOption {
    pub log_level: String,

    pub region: String,
    pub availability_zone: String,

    pub ports: Vec<i32>,
    pub ingress_cidrs: Vec<String>,
    pub peer_groups: Vec<String>,

    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub user_data_file: String,
    pub volume_size_in_gb: i32,
    pub interface_mode: String,

    pub state_dir: String,
    pub spec_file_path: String,
}

impl Spec {
    /// Creates a default spec.
    /// Without ingress CIDRs, the public IP of the local host is allowed.
    pub async fn default_aws(opts: DefaultSpecOption) -> io::Result<Self> {
        let id = {
            if !opts.spec_file_path.is_empty() {
                Path::new(&opts.spec_file_path)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
                    .ok_or_else(|| {
                        Error::new(
                            ErrorKind::InvalidInput,
                            format!("invalid spec file path '{}'", opts.spec_file_path),
                        )
                    })?
            } else {
                id_manager::time::with_prefix("spyup")
            }
        };

        let availability_zone = if opts.availability_zone.is_empty() {
            format!("{}a", opts.region)
        } else {
            opts.availability_zone.clone()
        };

        let cidrs = if !opts.ingress_cidrs.is_empty() {
            opts.ingress_cidrs.clone()
        } else {
            log::info!("empty ingress CIDRs, so default to public IP on the local host");
            if let Some(ip) = public_ip::addr().await {
                log::info!("found public ip address {:?}", ip);
                vec![format!("{}/32", ip)]
            } else {
                log::warn!("failed to get a public IP address -- default to 0.0.0.0/0");
                vec!["0.0.0.0/0".to_string()]
            }
        };

        let key_name = if opts.key_name.is_empty() {
            None
        } else {
            Some(opts.key_name.clone())
        };
        let interface_mode = opts
            .interface_mode
            .parse::<aws::InterfaceMode>()
            .map_err(io::Error::from)?;

        Ok(Self {
            id,

            domain_name: format!("{}.compute.internal", opts.region),
            region: opts.region,
            availability_zone,

            state_dir: opts.state_dir,
            rollback_on_failure: true,

            ingress: ingress::Ingress {
                ports: opts.ports,
                cidrs,
                peer_groups: opts.peer_groups,
            },
            spy: Spy {
                image_id: opts.image_id,
                instance_type: opts.instance_type,
                key_name,
                user_data_file: opts.user_data_file,

                volume_device_name: String::from("/dev/sdf"),
                volume_size_in_gb: opts.volume_size_in_gb,
                volume_type: String::from("standard"),

                interface_mode,
            },
        })
    }

    /// Converts to string in YAML format.
    pub fn encode_yaml(&self) -> io::Result<String> {
        serde_yaml::to_string(&self).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to serialize Spec to YAML {}", e),
            )
        })
    }

    /// Saves the current spec to disk
    /// and overwrites the file.
    pub fn sync(&self, file_path: &str) -> io::Result<()> {
        log::info!("syncing Spec to '{}'", file_path);
        let path = Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        let d = self.encode_yaml()?;
        let mut f = File::create(file_path)?;
        f.write_all(d.as_bytes())?;

        Ok(())
    }

    pub fn load(file_path: &str) -> io::Result<Self> {
        log::info!("loading Spec from {}", file_path);

        if !Path::new(file_path).exists() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("file {} does not exists", file_path),
            ));
        }

        let f = File::open(file_path).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("failed to open {} ({})", file_path, e),
            )
        })?;
        serde_yaml::from_reader(f)
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid YAML: {}", e)))
    }

    /// Validates the spec.
    pub fn validate(&self) -> io::Result<()> {
        log::info!("validating Spec");

        if self.region.is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput, "'region' cannot be empty"));
        }
        if !self.availability_zone.starts_with(&self.region) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "'availability_zone' {} is not in region {}",
                    self.availability_zone, self.region
                ),
            ));
        }
        if self.domain_name.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'domain_name' cannot be empty",
            ));
        }
        if self.state_dir.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'state_dir' cannot be empty",
            ));
        }

        self.ingress.validate()?;

        if self.spy.image_id.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'spy.image_id' cannot be empty",
            ));
        }
        if self.spy.instance_type.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'spy.instance_type' cannot be empty",
            ));
        }
        if self.spy.user_data_file.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "'spy.user_data_file' cannot be empty",
            ));
        }
        if self.spy.volume_size_in_gb <= 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "'spy.volume_size_in_gb' must be positive (got {})",
                    self.spy.volume_size_in_gb
                ),
            ));
        }

        Ok(())
    }
}

pub fn print_step(msg: &str) -> io::Result<()> {
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!("\n\n\nSTEP: {}\n", msg)),
        ResetColor
    )
}

pub fn print_notice(color: Color, msg: &str) -> io::Result<()> {
    execute!(stdout(), SetForegroundColor(color), Print(msg), ResetColor)
}

#[cfg(test)]
pub(crate) fn sample_spec(state_dir: &str, user_data_file: &str) -> Spec {
    Spec {
        id: String::from("spyup-test"),
        region: String::from("us-west-1"),
        availability_zone: String::from("us-west-1a"),
        domain_name: String::from("us-west-1.compute.internal"),
        state_dir: state_dir.to_string(),
        rollback_on_failure: true,
        ingress: ingress::Ingress {
            ports: vec![22, 8081],
            cidrs: vec![String::from("1.2.3.4/32")],
            peer_groups: Vec::new(),
        },
        spy: Spy {
            image_id: String::from(DEFAULT_IMAGE_ID),
            instance_type: String::from(DEFAULT_INSTANCE_TYPE),
            key_name: Some(String::from("demo-key")),
            user_data_file: user_data_file.to_string(),
            volume_device_name: String::from("/dev/sdf"),
            volume_size_in_gb: 30,
            volume_type: String::from("standard"),
            interface_mode: aws::InterfaceMode::Attached,
        },
    }
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- test_spec --exact --show-output
#[test]
fn test_spec() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = r#"

id: spyup-test
region: us-west-1
availability_zone: us-west-1a
domain_name: us-west-1.compute.internal
state_dir: /tmp/spyup
rollback_on_failure: true

ingress:
  ports: [22, 8081]
  cidrs:
  - 1.2.3.4/32

spy:
  image_id: ami-07585467
  instance_type: t2.micro
  key_name: demo-key
  user_data_file: user_data.sh
  volume_device_name: /dev/sdf
  volume_size_in_gb: 30
  volume_type: standard
  interface_mode: attached

"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    let ret = f.write_all(contents.as_bytes());
    assert!(ret.is_ok());
    let spec_path = f.path().to_str().unwrap();

    let spec = Spec::load(spec_path).unwrap();
    let ret = spec.sync(spec_path);
    assert!(ret.is_ok());

    let orig = sample_spec("/tmp/spyup", "user_data.sh");
    assert_eq!(spec, orig);
    spec.validate().expect("unexpected validate failure");

    let reloaded = Spec::load(spec_path).unwrap();
    assert_eq!(reloaded, orig);
}

#[test]
fn test_spec_rollback_default() {
    let _ = env_logger::builder().is_test(true).try_init();

    let contents = r#"
id: spyup-test
region: us-west-1
availability_zone: us-west-1a
state_dir: /tmp/spyup

ingress:
  ports: [22]

spy:
  image_id: ami-07585467
  instance_type: t2.micro
  user_data_file: user_data.sh
"#;
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    let spec = Spec::load(f.path().to_str().unwrap()).unwrap();
    assert!(spec.rollback_on_failure);

    let disabled = contents.replace(
        "state_dir: /tmp/spyup",
        "state_dir: /tmp/spyup\nrollback_on_failure: false",
    );
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(disabled.as_bytes()).unwrap();
    let spec = Spec::load(f.path().to_str().unwrap()).unwrap();
    assert!(!spec.rollback_on_failure);
}

#[test]
fn test_spec_validate() {
    let mut spec = sample_spec("/tmp/spyup", "user_data.sh");
    assert!(spec.validate().is_ok());

    spec.availability_zone = String::from("us-east-1a");
    assert_eq!(
        spec.validate().unwrap_err().kind(),
        ErrorKind::InvalidInput
    );

    let mut spec = sample_spec("/tmp/spyup", "user_data.sh");
    spec.ingress.cidrs = vec![String::from("bogus")];
    assert!(spec.validate().is_err());

    let mut spec = sample_spec("/tmp/spyup", "user_data.sh");
    spec.spy.volume_size_in_gb = 0;
    assert!(spec.validate().is_err());

    assert_eq!(
        Spec::load("/nonexistent/spyup.yaml").unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_default_aws() {
    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let spec = ab!(Spec::default_aws(DefaultSpecOption {
        log_level: String::from("info"),
        region: String::from("us-west-1"),
        availability_zone: String::new(),
        ports: DEFAULT_PORTS.to_vec(),
        ingress_cidrs: vec![String::from("1.2.3.4/32")],
        peer_groups: Vec::new(),
        image_id: String::from(DEFAULT_IMAGE_ID),
        instance_type: String::from(DEFAULT_INSTANCE_TYPE),
        key_name: String::new(),
        user_data_file: String::from(DEFAULT_USER_DATA_FILE),
        volume_size_in_gb: 30,
        interface_mode: String::from("dual-homed"),
        state_dir: String::from("/tmp/spyup"),
        spec_file_path: String::from("/tmp/my-spy.yaml"),
    }))
    .unwrap();

    assert_eq!(spec.id, "my-spy");
    assert_eq!(spec.availability_zone, "us-west-1a");
    assert_eq!(spec.domain_name, "us-west-1.compute.internal");
    assert_eq!(spec.ingress.cidrs, vec!["1.2.3.4/32"]);
    assert_eq!(spec.spy.key_name, None);
    assert_eq!(spec.spy.interface_mode, aws::InterfaceMode::DualHomed);
    assert!(spec.rollback_on_failure);
    spec.validate().unwrap();
}
