use std::fs;

use crossterm::style::Color;

use crate::{
    aws::{
        CreatedResource, Ec2Api, InstanceInterface, InstanceRequest, InterfaceMode,
        NetworkInterfaceRequest, Volume,
    },
    errors::{self, Result},
    outcome::{halt, Outcome},
    print_notice, print_step,
    prompt::Confirm,
    state::{InstanceState, Kind, NetworkState, StateRepository},
    Spec,
};

/// Settings of one spy launch.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SpyOptions {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub user_data_file: String,
    pub volume: Volume,
    pub interface_mode: InterfaceMode,
    /// Used when the network state does not record its availability zone.
    pub availability_zone: String,
    pub rollback_on_failure: bool,
}

impl From<&Spec> for SpyOptions {
    fn from(spec: &Spec) -> Self {
        Self {
            image_id: spec.spy.image_id.clone(),
            instance_type: spec.spy.instance_type.clone(),
            key_name: spec.spy.key_name.clone(),
            user_data_file: spec.spy.user_data_file.clone(),
            volume: Volume {
                device_name: spec.spy.volume_device_name.clone(),
                size_in_gb: spec.spy.volume_size_in_gb,
                volume_type: spec.spy.volume_type.clone(),
            },
            interface_mode: spec.spy.interface_mode,
            availability_zone: spec.availability_zone.clone(),
            rollback_on_failure: spec.rollback_on_failure,
        }
    }
}

/// Reads the boot script in full.
pub fn read_user_data(file_path: &str) -> Result<String> {
    fs::read_to_string(file_path).map_err(|e| {
        errors::config(format!(
            "failed to read boot script '{}' ({})",
            file_path, e
        ))
    })
}

/// Loads the network recorded by the latest "provision-network" run.
pub fn latest_network<R: StateRepository + ?Sized>(repo: &R) -> Result<(String, NetworkState)> {
    let (name, record) = repo.latest(Kind::Network)?.ok_or_else(|| {
        errors::config("no network state found (run 'provision-network' first)")
    })?;
    let network = NetworkState::from_record(&record)
        .map_err(|e| errors::config(format!("network state '{}': {}", name, e.message())))?;
    Ok((name, network))
}

/// Builds the launch request for the spy instance.
/// In dual-homed mode the request only holds the new primary interface.
pub fn instance_request(
    network: &NetworkState,
    opts: &SpyOptions,
    network_interface_id: &str,
    user_data: String,
) -> InstanceRequest {
    let interfaces = match opts.interface_mode {
        InterfaceMode::Attached => vec![InstanceInterface::Existing {
            device_index: 0,
            network_interface_id: network_interface_id.to_string(),
        }],
        // the pre-created interface is attached after launch
        InterfaceMode::DualHomed => vec![InstanceInterface::New {
            device_index: 0,
            subnet_id: network.subnet_id.clone(),
            security_group_id: network.sg_id.clone(),
        }],
    };

    InstanceRequest {
        name: format!("{}_spy", network.label),
        image_id: opts.image_id.clone(),
        instance_type: opts.instance_type.clone(),
        key_name: opts.key_name.clone(),
        availability_zone: network
            .availability_zone
            .clone()
            .unwrap_or_else(|| opts.availability_zone.clone()),
        user_data,
        volume: opts.volume.clone(),
        interfaces,
    }
}

/// Device index of the pre-created interface in dual-homed mode.
pub const SECONDARY_DEVICE_INDEX: i32 = 1;

/// Local inputs of a launch, read before any provider call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Prepared {
    /// Name of the network state the launch reads.
    pub source: String,
    pub network: NetworkState,
    pub user_data: String,
}

/// Loads the latest network state and the boot script.
pub fn prepare<R: StateRepository + ?Sized>(repo: &R, opts: &SpyOptions) -> Result<Prepared> {
    print_step("loading the network state")?;
    let (source, network) = latest_network(repo)?;
    log::info!(
        "launching into '{}' (VPC {}, subnet {}) from '{}'",
        network.label,
        network.vpc_id,
        network.subnet_id,
        source
    );
    let user_data = read_user_data(&opts.user_data_file)?;
    log::info!(
        "read {} byte(s) of boot script from '{}'",
        user_data.len(),
        opts.user_data_file
    );
    Ok(Prepared {
        source,
        network,
        user_data,
    })
}

/// Creates a network interface in the prepared network
/// and launches the spy instance on it.
pub async fn launch<E, C, R>(
    ec2: &E,
    confirm: &C,
    repo: &R,
    opts: &SpyOptions,
    prepared: Prepared,
    host_octet: u8,
) -> Result<Outcome<InstanceState>>
where
    E: Ec2Api,
    C: Confirm + ?Sized,
    R: StateRepository + ?Sized,
{
    let Prepared {
        network, user_data, ..
    } = prepared;

    let private_ip = network.base_ip.host(host_octet).to_string();
    let prompt = format!(
        "About to create network interface {} in subnet {}.",
        private_ip, network.subnet_id
    );
    if !confirm.confirm(&prompt)? {
        log::info!("spy launch aborted before creating the network interface");
        return Ok(Outcome::Aborted);
    }

    let mut created: Vec<CreatedResource> = Vec::new();

    print_step("creating network interface")?;
    let req = NetworkInterfaceRequest {
        subnet_id: network.subnet_id.clone(),
        security_group_id: network.sg_id.clone(),
        private_ip,
        description: format!("{}_spy", network.label),
    };
    let eni = match ec2.create_network_interface(&req).await {
        Ok(eni) => eni,
        Err(e) => {
            return halt(
                ec2,
                "create network interface",
                e,
                created,
                opts.rollback_on_failure,
            )
            .await;
        }
    };
    let eni_resource = CreatedResource::NetworkInterface(eni.network_interface_id.clone());
    print_notice(
        Color::Blue,
        &format!(
            "created network interface {} ({})\n",
            eni.network_interface_id, eni.private_ip
        ),
    )?;
    println!("\n# run the following to delete the network interface\n");
    print_notice(Color::Magenta, &format!("{}\n\n", eni_resource.delete_command()))?;
    created.push(eni_resource);

    let prompt = format!(
        "About to launch '{}_spy' ({}) on {}.",
        network.label, opts.instance_type, eni.network_interface_id
    );
    let proceed = match confirm.confirm(&prompt) {
        Ok(proceed) => proceed,
        Err(e) => {
            return halt(
                ec2,
                "confirm instance launch",
                e.into(),
                created,
                opts.rollback_on_failure,
            )
            .await;
        }
    };
    if !proceed {
        log::info!(
            "spy launch aborted, network interface {} is kept",
            eni.network_interface_id
        );
        return Ok(Outcome::Aborted);
    }

    print_step("launching spy instance")?;
    let req = instance_request(&network, opts, &eni.network_interface_id, user_data);
    let instance_id = match ec2.run_instance(&req).await {
        Ok(id) => id,
        Err(e) => {
            return halt(ec2, "launch instance", e, created, opts.rollback_on_failure).await;
        }
    };
    created.push(CreatedResource::Instance(instance_id.clone()));
    print_notice(
        Color::Blue,
        &format!("launched instance {} as '{}'\n", instance_id, req.name),
    )?;

    if opts.interface_mode == InterfaceMode::DualHomed {
        print_step("attaching network interface")?;
        let attachment_id = match ec2
            .attach_network_interface(
                &eni.network_interface_id,
                &instance_id,
                SECONDARY_DEVICE_INDEX,
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return halt(
                    ec2,
                    "attach network interface",
                    e,
                    created,
                    opts.rollback_on_failure,
                )
                .await;
            }
        };
        print_notice(
            Color::Blue,
            &format!(
                "attached {} to {} ({})\n",
                eni.network_interface_id, instance_id, attachment_id
            ),
        )?;
    }

    let vpc_id = if eni.vpc_id.is_empty() {
        network.vpc_id.clone()
    } else {
        eni.vpc_id.clone()
    };
    let state = InstanceState {
        network_interface_id: eni.network_interface_id,
        private_ip: eni.private_ip,
        vpc_id,
        instance_id,
        label: network.label.clone(),
    };
    let saved = match repo.save(Kind::Instance, &state.to_record()) {
        Ok(saved) => saved,
        Err(e) => {
            return halt(
                ec2,
                "save instance state",
                e,
                created,
                opts.rollback_on_failure,
            )
            .await;
        }
    };
    print_notice(Color::Green, &format!("\nsaved instance state to '{}'\n", saved))?;

    Ok(Outcome::Completed(state))
}

#[cfg(test)]
fn sample_setup(user_data_file: &str) -> (crate::testing::MemoryRepository, SpyOptions) {
    let repo = crate::testing::MemoryRepository::new();
    repo.insert(
        "network_2024-06-01_at_00-00-00.state",
        crate::state::sample_network_state().to_record(),
    );
    let opts = SpyOptions::from(&crate::sample_spec("/tmp/spyup", user_data_file));
    (repo, opts)
}

#[cfg(test)]
fn sample_user_data() -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"#!/bin/bash\necho spy\n").unwrap();
    f
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- launch::test_launch --exact --show-output
#[test]
fn test_launch() {
    use crate::testing::{FakeEc2, Scripted};

    let _ = env_logger::builder().is_test(true).try_init();
    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let user_data = sample_user_data();
    let (repo, opts) = sample_setup(user_data.path().to_str().unwrap());
    let prepared = prepare(&repo, &opts).unwrap();
    assert_eq!(prepared.source, "network_2024-06-01_at_00-00-00.state");

    let ec2 = FakeEc2::new();
    let confirm = Scripted::new(&["y", "yes"]);
    let outcome = ab!(launch(&ec2, &confirm, &repo, &opts, prepared, 111)).unwrap();
    let state = match outcome {
        Outcome::Completed(state) => state,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(confirm.asked().len(), 2);
    assert_eq!(ec2.ops(), vec!["create_network_interface", "run_instance"]);
    assert_eq!(
        ec2.calls()[0],
        "create_network_interface subnet-0123 sg-0123 10.42.0.111"
    );

    let requests = ec2.instance_requests.borrow();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req.name, "ab1cd_spy");
    assert_eq!(req.availability_zone, "us-west-1a");
    assert_eq!(req.key_name.as_deref(), Some("demo-key"));
    assert_eq!(req.user_data, "#!/bin/bash\necho spy\n");
    assert_eq!(req.volume.device_name, "/dev/sdf");
    assert_eq!(req.volume.size_in_gb, 30);
    assert_eq!(
        req.interfaces,
        vec![InstanceInterface::Existing {
            device_index: 0,
            network_interface_id: String::from("eni-0001"),
        }]
    );

    assert_eq!(state.network_interface_id, "eni-0001");
    assert_eq!(state.private_ip, "10.42.0.111");
    assert_eq!(state.vpc_id, "vpc-0123");
    assert_eq!(state.instance_id, "i-0002");
    assert_eq!(state.label, "ab1cd");

    let saved = repo.records(Kind::Instance);
    assert_eq!(saved.len(), 1);
    assert_eq!(InstanceState::from_record(&saved[0].1).unwrap(), state);
}

#[test]
fn test_launch_dual_homed() {
    use crate::testing::{FakeEc2, Scripted};

    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let user_data = sample_user_data();
    let (repo, mut opts) = sample_setup(user_data.path().to_str().unwrap());
    opts.interface_mode = InterfaceMode::DualHomed;

    let ec2 = FakeEc2::new();
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome = ab!(launch(&ec2, &Scripted::new(&["y", "y"]), &repo, &opts, prepared, 150)).unwrap();
    assert_eq!(outcome.exit_code(), crate::outcome::EXIT_COMPLETED);

    assert_eq!(
        ec2.ops(),
        vec![
            "create_network_interface",
            "run_instance",
            "attach_network_interface"
        ]
    );
    assert_eq!(ec2.calls()[2], "attach_network_interface eni-0001 i-0002 1");
    assert_eq!(
        ec2.instance_requests.borrow()[0].interfaces,
        vec![InstanceInterface::New {
            device_index: 0,
            subnet_id: String::from("subnet-0123"),
            security_group_id: String::from("sg-0123"),
        }]
    );

    // a failed attach terminates the instance before deleting the interface
    let ec2 = FakeEc2::failing_on("attach_network_interface");
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome = ab!(launch(&ec2, &Scripted::new(&["y", "y"]), &repo, &opts, prepared, 150)).unwrap();
    let failure = match outcome {
        Outcome::PartiallyFailed(failure) => failure,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failure.step, "attach network interface");
    assert_eq!(
        *ec2.deleted.borrow(),
        vec![
            CreatedResource::Instance(String::from("i-0002")),
            CreatedResource::NetworkInterface(String::from("eni-0001")),
        ]
    );
    assert_eq!(repo.records(Kind::Instance).len(), 1);
}

#[test]
fn test_instance_request_dual_homed() {
    let mut opts = SpyOptions::from(&crate::sample_spec("/tmp/spyup", "user_data.sh"));
    opts.interface_mode = InterfaceMode::DualHomed;
    let mut network = crate::state::sample_network_state();
    network.availability_zone = None;
    opts.availability_zone = String::from("us-west-1c");

    let req = instance_request(&network, &opts, "eni-0123", String::from("#!/bin/bash\n"));
    assert_eq!(req.availability_zone, "us-west-1c");
    assert_eq!(
        req.interfaces,
        vec![InstanceInterface::New {
            device_index: 0,
            subnet_id: String::from("subnet-0123"),
            security_group_id: String::from("sg-0123"),
        }]
    );
}

#[test]
fn test_prepare_missing_sg_id() {
    use crate::{state::Record, testing::MemoryRepository};

    let user_data = sample_user_data();
    let (_, opts) = sample_setup(user_data.path().to_str().unwrap());

    let mut record = Record::new();
    for (k, v) in crate::state::sample_network_state().to_record().entries() {
        if k != "sg_id" {
            record.insert(k, v);
        }
    }
    let repo = MemoryRepository::new();
    repo.insert("network_2024-06-01_at_00-00-00.state", record);

    let e = prepare(&repo, &opts).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("sg_id"));
    assert!(e.message().contains("network_2024-06-01_at_00-00-00.state"));

    // no network state at all
    let e = prepare(&MemoryRepository::new(), &opts).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("provision-network"));
}

#[test]
fn test_prepare_missing_user_data() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.sh");
    let (repo, opts) = sample_setup(missing.to_str().unwrap());

    let e = prepare(&repo, &opts).unwrap_err();
    assert!(e.is_config());
    assert!(e.message().contains("missing.sh"));
}

#[test]
fn test_launch_aborted() {
    use crate::testing::{FakeEc2, Scripted};

    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let user_data = sample_user_data();
    let (repo, opts) = sample_setup(user_data.path().to_str().unwrap());

    // declined at the first gate
    let ec2 = FakeEc2::new();
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome = ab!(launch(&ec2, &Scripted::new(&["no"]), &repo, &opts, prepared, 111)).unwrap();
    assert!(outcome.is_aborted());
    assert!(ec2.calls().is_empty());

    // declined at the second gate, the interface is kept
    let ec2 = FakeEc2::new();
    let confirm = Scripted::new(&["y", "N"]);
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome = ab!(launch(&ec2, &confirm, &repo, &opts, prepared, 111)).unwrap();
    assert!(outcome.is_aborted());
    assert_eq!(confirm.asked().len(), 2);
    assert_eq!(ec2.ops(), vec!["create_network_interface"]);
    assert!(ec2.deleted.borrow().is_empty());
    assert!(repo.records(Kind::Instance).is_empty());
}

#[test]
fn test_launch_rollback() {
    use crate::testing::{FakeEc2, Scripted};

    let _ = env_logger::builder().is_test(true).try_init();
    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let user_data = sample_user_data();
    let (repo, opts) = sample_setup(user_data.path().to_str().unwrap());

    let ec2 = FakeEc2::failing_on("run_instance");
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome =
        ab!(launch(&ec2, &Scripted::new(&["y", "y"]), &repo, &opts, prepared, 200)).unwrap();
    let failure = match outcome {
        Outcome::PartiallyFailed(failure) => failure,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failure.step, "launch instance");
    assert_eq!(
        failure.created,
        vec![CreatedResource::NetworkInterface(String::from("eni-0001"))]
    );
    assert_eq!(*ec2.deleted.borrow(), failure.created);
    assert!(repo.records(Kind::Instance).is_empty());

    // interface creation failing leaves nothing behind
    let ec2 = FakeEc2::failing_on("create_network_interface");
    let prepared = prepare(&repo, &opts).unwrap();
    let e = ab!(launch(&ec2, &Scripted::new(&["y", "y"]), &repo, &opts, prepared, 200)).unwrap_err();
    assert!(!e.is_config());
    assert!(ec2.deleted.borrow().is_empty());

    // rollback failures keep the delete command around
    let mut ec2 = FakeEc2::failing_on("run_instance");
    ec2.fail_deletes = true;
    let prepared = prepare(&repo, &opts).unwrap();
    let outcome =
        ab!(launch(&ec2, &Scripted::new(&["y", "y"]), &repo, &opts, prepared, 200)).unwrap();
    let failure = match outcome {
        Outcome::PartiallyFailed(failure) => failure,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failure.rollback.failed.len(), 1);
    assert_eq!(
        failure.rollback.remaining(&failure.created)[0].delete_command(),
        "aws ec2 delete-network-interface --network-interface-id eni-0001"
    );
}
