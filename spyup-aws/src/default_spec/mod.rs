use std::io::{self, stdout};

use clap::{value_parser, Arg, Command};
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};

pub const NAME: &str = "default-spec";

pub fn command() -> Command {
    Command::new(NAME)
        .about("Writes a default configuration")
        .arg(
            Arg::new("LOG_LEVEL")
                .long("log-level")
                .short('l')
                .help("Sets the log level")
                .required(false)
                .num_args(1)
                .value_parser(["debug", "info"])
                .default_value("info"),
        )
        .arg(
            Arg::new("REGION")
                .long("region")
                .short('r')
                .help("Sets the AWS region for API calls/endpoints")
                .required(false)
                .num_args(1)
                .default_value(spyup_aws::DEFAULT_REGION),
        )
        .arg(
            Arg::new("AVAILABILITY_ZONE")
                .long("availability-zone")
                .help("Sets the availability zone of the subnet and the spy (if empty, the first zone of the region)")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("INGRESS_PORTS")
                .long("ingress-ports")
                .help("Comma-separated TCP ports to open on the security group")
                .required(false)
                .value_delimiter(',')
                .value_parser(value_parser!(i32))
                .default_values(["22", "27017", "8081", "19999", "9090", "3000"]),
        )
        .arg(
            Arg::new("INGRESS_CIDRS")
                .long("ingress-cidrs")
                .help("Comma-separated CIDRs allowed on every port (if empty, the public IP of the local host)")
                .required(false)
                .value_delimiter(','),
        )
        .arg(
            Arg::new("PEER_GROUPS")
                .long("peer-groups")
                .help("Comma-separated security group IDs allowed on every port")
                .required(false)
                .value_delimiter(','),
        )
        .arg(
            Arg::new("IMAGE_ID")
                .long("image-id")
                .help("Sets the AMI of the spy instance")
                .required(false)
                .num_args(1)
                .default_value(spyup_aws::DEFAULT_IMAGE_ID),
        )
        .arg(
            Arg::new("INSTANCE_TYPE")
                .long("instance-type")
                .help("Sets the EC2 instance type of the spy")
                .required(false)
                .num_args(1)
                .default_value(spyup_aws::DEFAULT_INSTANCE_TYPE),
        )
        .arg(
            Arg::new("KEY_NAME")
                .long("key-name")
                .help("Sets the EC2 key pair name for SSH access")
                .required(false)
                .num_args(1),
        )
        .arg(
            Arg::new("USER_DATA_FILE")
                .long("user-data-file")
                .help("Sets the boot script passed to the spy as user data")
                .required(false)
                .num_args(1)
                .default_value(spyup_aws::DEFAULT_USER_DATA_FILE),
        )
        .arg(
            Arg::new("VOLUME_SIZE_IN_GB")
                .long("volume-size-in-gb")
                .help("Sets the size of the extra EBS volume")
                .required(false)
                .num_args(1)
                .value_parser(value_parser!(i32))
                .default_value("30"),
        )
        .arg(
            Arg::new("INTERFACE_MODE")
                .long("interface-mode")
                .help("Sets how the spy is wired to the network")
                .required(false)
                .num_args(1)
                .value_parser(["attached", "dual-homed"])
                .default_value("attached"),
        )
        .arg(
            Arg::new("STATE_DIR")
                .long("state-dir")
                .help("Sets the directory of the network and instance state files")
                .required(false)
                .num_args(1)
                .default_value("."),
        )
        .arg(
            Arg::new("SPEC_FILE_PATH")
                .long("spec-file-path")
                .short('s')
                .help("The config file to create")
                .required(false)
                .num_args(1),
        )
}

pub async fn execute(opts: spyup_aws::DefaultSpecOption) -> io::Result<()> {
    // ref. https://github.com/env-logger-rs/env_logger/issues/47
    env_logger::init_from_env(
        env_logger::Env::default()
            .filter_or(env_logger::DEFAULT_FILTER_ENV, opts.log_level.clone()),
    );

    let spec = spyup_aws::Spec::default_aws(opts.clone()).await?;
    spec.validate()?;

    let spec_file_path = {
        if opts.spec_file_path.is_empty() {
            dir_manager::home::named(&spec.id, Some(".yaml"))
        } else {
            opts.spec_file_path
        }
    };
    spec.sync(&spec_file_path)?;

    execute!(
        stdout(),
        SetForegroundColor(Color::Blue),
        Print(format!("\nSaved spec: '{}'\n", spec_file_path)),
        ResetColor
    )?;
    println!("{}", spec.encode_yaml()?);

    println!();
    println!("# run the following to create the spy network");
    execute!(
        stdout(),
        SetForegroundColor(Color::Magenta),
        Print(format!("vi {}\n\n", spec_file_path)),
        ResetColor
    )?;
    let exec_path = std::env::current_exe()?;
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "{} provision-network \\\n--spec-file-path {}\n",
            exec_path.display(),
            spec_file_path
        )),
        ResetColor
    )?;
    println!();
    println!("# run the following to launch the spy into the latest network");
    execute!(
        stdout(),
        SetForegroundColor(Color::Green),
        Print(format!(
            "{} launch-spy \\\n--spec-file-path {}\n\n",
            exec_path.display(),
            spec_file_path
        )),
        ResetColor
    )?;

    Ok(())
}

#[test]
fn test_command_lists() {
    let matches = command()
        .try_get_matches_from([NAME, "--ingress-ports", "22,8081", "--peer-groups", "sg-1,sg-2"])
        .unwrap();
    let ports: Vec<i32> = matches
        .get_many::<i32>("INGRESS_PORTS")
        .unwrap()
        .copied()
        .collect();
    assert_eq!(ports, vec![22, 8081]);
    let groups: Vec<&String> = matches.get_many::<String>("PEER_GROUPS").unwrap().collect();
    assert_eq!(groups, vec!["sg-1", "sg-2"]);
    assert!(matches.get_many::<String>("INGRESS_CIDRS").is_none());

    let matches = command().try_get_matches_from([NAME]).unwrap();
    let ports: Vec<i32> = matches
        .get_many::<i32>("INGRESS_PORTS")
        .unwrap()
        .copied()
        .collect();
    assert_eq!(ports, spyup_aws::DEFAULT_PORTS.to_vec());

    assert!(command()
        .try_get_matches_from([NAME, "--ingress-ports", "22,x"])
        .is_err());
}
