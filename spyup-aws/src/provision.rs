use crossterm::style::Color;

use crate::{
    aws::{CreatedResource, DnsAttribute, Ec2Api},
    errors::Result,
    ingress::Ingress,
    outcome::{halt, Outcome},
    print_notice, print_step,
    prompt::Confirm,
    random::{self, BaseAddress},
    state::{Kind, NetworkState, StateRepository},
    Spec,
};

/// Settings of one network provisioning run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NetworkOptions {
    pub region: String,
    pub availability_zone: String,
    pub domain_name: String,
    pub ingress: Ingress,
    pub rollback_on_failure: bool,
}

impl From<&Spec> for NetworkOptions {
    fn from(spec: &Spec) -> Self {
        Self {
            region: spec.region.clone(),
            availability_zone: spec.availability_zone.clone(),
            domain_name: spec.domain_name.clone(),
            ingress: spec.ingress.clone(),
            rollback_on_failure: spec.rollback_on_failure,
        }
    }
}

/// Run label and base address, decided before anything is created.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Plan {
    pub label: String,
    pub base: BaseAddress,
}

impl Plan {
    pub fn generate() -> Self {
        Self {
            label: random::generate_label(),
            base: random::generate_base_address(),
        }
    }

    /// Returns the "Name" tag of a resource, e.g., "ab1cd_vpc".
    pub fn name(&self, suffix: &str) -> String {
        format!("{}_{}", self.label, suffix)
    }
}

/// Creates the VPC, its subnet, DHCP options, internet gateway,
/// route table and security group, then records them in a new network state.
pub async fn provision<E, C, R>(
    ec2: &E,
    confirm: &C,
    repo: &R,
    opts: &NetworkOptions,
    plan: &Plan,
) -> Result<Outcome<NetworkState>>
where
    E: Ec2Api,
    C: Confirm + ?Sized,
    R: StateRepository + ?Sized,
{
    let vpc_cidr = plan.base.vpc_cidr();
    let subnet_cidr = plan.base.subnet_cidr();

    print_step("planning the spy network")?;
    println!("label:             {}", plan.label);
    println!("base address:      {}", plan.base);
    println!("VPC CIDR:          {}", vpc_cidr);
    println!("subnet CIDR:       {}", subnet_cidr);
    println!("region:            {}", opts.region);
    println!("availability zone: {}", opts.availability_zone);
    println!("ingress ports:     {:?}", opts.ingress.ports);
    println!();

    let prompt = format!(
        "About to create VPC '{}' and its network resources in {}.",
        plan.name("vpc"),
        opts.region
    );
    if !confirm.confirm(&prompt)? {
        log::info!("network provisioning aborted by the operator");
        return Ok(Outcome::Aborted);
    }

    let mut created: Vec<CreatedResource> = Vec::new();

    // halts the run at the first failed call
    macro_rules! step {
        ($name:expr, $call:expr) => {
            match $call.await {
                Ok(v) => v,
                Err(e) => {
                    return halt(ec2, $name, e, created, opts.rollback_on_failure).await;
                }
            }
        };
    }

    print_step("creating VPC")?;
    let vpc_id = step!("create VPC", ec2.create_vpc(&vpc_cidr, &plan.name("vpc")));
    created.push(CreatedResource::Vpc(vpc_id.clone()));
    print_notice(Color::Blue, &format!("created VPC {}\n", vpc_id))?;

    step!(
        "enable DNS support",
        ec2.enable_vpc_dns(&vpc_id, DnsAttribute::Support)
    );
    step!(
        "enable DNS hostnames",
        ec2.enable_vpc_dns(&vpc_id, DnsAttribute::Hostnames)
    );

    print_step("creating subnet")?;
    let subnet_id = step!(
        "create subnet",
        ec2.create_subnet(
            &vpc_id,
            &subnet_cidr,
            &opts.availability_zone,
            &plan.name("subnet")
        )
    );
    created.push(CreatedResource::Subnet(subnet_id.clone()));
    print_notice(Color::Blue, &format!("created subnet {}\n", subnet_id))?;

    print_step("creating DHCP options")?;
    let dhcp_options_id = step!(
        "create DHCP options",
        ec2.create_dhcp_options(&opts.domain_name, &plan.name("dhcp"))
    );
    created.push(CreatedResource::DhcpOptions {
        id: dhcp_options_id.clone(),
        vpc_id: None,
    });
    step!(
        "associate DHCP options",
        ec2.associate_dhcp_options(&dhcp_options_id, &vpc_id)
    );
    if let Some(CreatedResource::DhcpOptions { vpc_id: v, .. }) = created.last_mut() {
        *v = Some(vpc_id.clone());
    }

    print_step("creating internet gateway")?;
    let internet_gateway_id = step!(
        "create internet gateway",
        ec2.create_internet_gateway(&plan.name("igw"))
    );
    created.push(CreatedResource::InternetGateway {
        id: internet_gateway_id.clone(),
        vpc_id: None,
    });
    step!(
        "attach internet gateway",
        ec2.attach_internet_gateway(&internet_gateway_id, &vpc_id)
    );
    if let Some(CreatedResource::InternetGateway { vpc_id: v, .. }) = created.last_mut() {
        *v = Some(vpc_id.clone());
    }

    print_step("creating route table")?;
    let route_table_id = step!(
        "create route table",
        ec2.create_route_table(&vpc_id, &plan.name("rtb"))
    );
    created.push(CreatedResource::RouteTable(route_table_id.clone()));
    step!(
        "create default route",
        ec2.create_default_route(&route_table_id, &internet_gateway_id)
    );
    let association_id = step!(
        "associate route table",
        ec2.associate_route_table(&route_table_id, &subnet_id)
    );
    created.push(CreatedResource::RouteTableAssociation(association_id));

    print_step("creating security group")?;
    let sg_label = plan.name("sg");
    let sg_id = step!(
        "create security group",
        ec2.create_security_group(
            &sg_label,
            &format!("spy network {}", plan.label),
            &vpc_id
        )
    );
    created.push(CreatedResource::SecurityGroup(sg_id.clone()));
    let rules = opts.ingress.rules(&vpc_cidr);
    step!("authorize ingress", ec2.authorize_ingress(&sg_id, &rules));
    print_notice(
        Color::Blue,
        &format!("created security group {} with {} rule(s)\n", sg_id, rules.len()),
    )?;

    let state = NetworkState {
        label: plan.label.clone(),
        base_ip: plan.base,
        vpc_id,
        vpc_label: plan.name("vpc"),
        subnet_id,
        sg_id,
        sg_label,

        region: Some(opts.region.clone()),
        availability_zone: Some(opts.availability_zone.clone()),
        dhcp_options_id: Some(dhcp_options_id),
        internet_gateway_id: Some(internet_gateway_id),
        route_table_id: Some(route_table_id),
    };
    let saved = match repo.save(Kind::Network, &state.to_record()) {
        Ok(saved) => saved,
        Err(e) => {
            return halt(
                ec2,
                "save network state",
                e,
                created,
                opts.rollback_on_failure,
            )
            .await;
        }
    };
    log::info!("created {} resource(s) for '{}'", created.len(), plan.label);
    print_notice(Color::Green, &format!("\nsaved network state to '{}'\n", saved))?;

    Ok(Outcome::Completed(state))
}

#[cfg(test)]
fn sample_plan() -> Plan {
    use std::str::FromStr;
    Plan {
        label: String::from("ab1cd"),
        base: BaseAddress::from_str("10.42.0.0").unwrap(),
    }
}

#[cfg(test)]
fn sample_options() -> NetworkOptions {
    NetworkOptions::from(&crate::sample_spec("/tmp/spyup", "user_data.sh"))
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- provision::test_provision --exact --show-output
#[test]
fn test_provision() {
    use crate::testing::{FakeEc2, MemoryRepository, Scripted};

    let _ = env_logger::builder().is_test(true).try_init();
    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let ec2 = FakeEc2::new();
    let confirm = Scripted::new(&[" YES "]);
    let repo = MemoryRepository::new();
    let opts = sample_options();

    let outcome = ab!(provision(&ec2, &confirm, &repo, &opts, &sample_plan())).unwrap();
    let state = match outcome {
        Outcome::Completed(state) => state,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(
        ec2.ops(),
        vec![
            "create_vpc",
            "enable_vpc_dns",
            "enable_vpc_dns",
            "create_subnet",
            "create_dhcp_options",
            "associate_dhcp_options",
            "create_internet_gateway",
            "attach_internet_gateway",
            "create_route_table",
            "create_default_route",
            "associate_route_table",
            "create_security_group",
            "authorize_ingress",
        ]
    );
    let calls = ec2.calls();
    assert_eq!(calls[0], "create_vpc 10.42.0.0/16 ab1cd_vpc");
    assert_eq!(calls[1], "enable_vpc_dns vpc-0001 Support");
    assert_eq!(calls[2], "enable_vpc_dns vpc-0001 Hostnames");
    assert_eq!(
        calls[3],
        "create_subnet vpc-0001 10.42.0.0/24 us-west-1a ab1cd_subnet"
    );
    assert_eq!(
        calls[4],
        "create_dhcp_options us-west-1.compute.internal ab1cd_dhcp"
    );
    assert_eq!(calls[11], "create_security_group ab1cd_sg vpc-0001");

    let rules = ec2.rules.borrow();
    assert_eq!(rules.len(), 2);
    for r in rules.iter() {
        assert_eq!(r.cidrs(), vec!["1.2.3.4/32", "10.42.0.0/16"]);
    }

    assert_eq!(state.label, "ab1cd");
    assert_eq!(state.vpc_label, "ab1cd_vpc");
    assert_eq!(state.sg_label, "ab1cd_sg");
    assert_eq!(state.base_ip.to_string(), "10.42.0.0");

    let saved = repo.records(Kind::Network);
    assert_eq!(saved.len(), 1);
    assert_eq!(NetworkState::from_record(&saved[0].1).unwrap(), state);
    assert!(ec2.deleted.borrow().is_empty());
}

#[test]
fn test_provision_aborted() {
    use crate::testing::{FakeEc2, MemoryRepository, Scripted};

    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    for answer in ["n", "", "yess"] {
        let ec2 = FakeEc2::new();
        let confirm = Scripted::new(&[answer]);
        let repo = MemoryRepository::new();

        let outcome =
            ab!(provision(&ec2, &confirm, &repo, &sample_options(), &sample_plan())).unwrap();
        assert!(outcome.is_aborted());
        assert_eq!(confirm.asked().len(), 1);
        assert!(ec2.calls().is_empty());
        assert!(repo.records(Kind::Network).is_empty());
    }
}

#[test]
fn test_provision_failed_first_call() {
    use crate::testing::{FakeEc2, MemoryRepository, Scripted};

    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let ec2 = FakeEc2::failing_on("create_vpc");
    let repo = MemoryRepository::new();
    let e = ab!(provision(
        &ec2,
        &Scripted::new(&["y"]),
        &repo,
        &sample_options(),
        &sample_plan()
    ))
    .unwrap_err();
    assert!(!e.is_config());
    assert!(e.message().contains("create_vpc"));
    assert_eq!(ec2.ops(), vec!["create_vpc"]);
    assert!(repo.records(Kind::Network).is_empty());
}

/// RUST_LOG=debug cargo test --package spyup-aws --lib -- provision::test_provision_rollback --exact --show-output
#[test]
fn test_provision_rollback() {
    use crate::testing::{FakeEc2, MemoryRepository, Scripted};

    let _ = env_logger::builder().is_test(true).try_init();
    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let ec2 = FakeEc2::failing_on("create_security_group");
    let repo = MemoryRepository::new();
    let outcome = ab!(provision(
        &ec2,
        &Scripted::new(&["y"]),
        &repo,
        &sample_options(),
        &sample_plan()
    ))
    .unwrap();

    let failure = match outcome {
        Outcome::PartiallyFailed(failure) => failure,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failure.step, "create security group");
    assert_eq!(failure.created.len(), 6);
    assert!(failure.rollback.attempted);
    assert!(failure.rollback.failed.is_empty());
    assert!(failure.rollback.remaining(&failure.created).is_empty());

    let deleted = ec2.deleted.borrow();
    let expected: Vec<CreatedResource> = failure.created.iter().rev().cloned().collect();
    assert_eq!(*deleted, expected);
    assert_eq!(deleted[0], CreatedResource::RouteTableAssociation(String::from("rtbassoc-0006")));
    assert_eq!(
        deleted[2],
        CreatedResource::InternetGateway {
            id: String::from("igw-0004"),
            vpc_id: Some(String::from("vpc-0001")),
        }
    );
    assert_eq!(deleted[5], CreatedResource::Vpc(String::from("vpc-0001")));
    assert!(repo.records(Kind::Network).is_empty());
}

#[test]
fn test_provision_rollback_disabled() {
    use crate::testing::{FakeEc2, MemoryRepository, Scripted};

    macro_rules! ab {
        ($e:expr) => {
            tokio_test::block_on($e)
        };
    }

    let ec2 = FakeEc2::failing_on("authorize_ingress");
    let mut opts = sample_options();
    opts.rollback_on_failure = false;

    let outcome = ab!(provision(
        &ec2,
        &Scripted::new(&["y"]),
        &MemoryRepository::new(),
        &opts,
        &sample_plan()
    ))
    .unwrap();
    assert_eq!(outcome.exit_code(), crate::outcome::EXIT_PARTIALLY_FAILED);

    let failure = match outcome {
        Outcome::PartiallyFailed(failure) => failure,
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(failure.step, "authorize ingress");
    assert_eq!(failure.created.len(), 7);
    assert!(!failure.rollback.attempted);
    assert!(ec2.deleted.borrow().is_empty());

    let remaining = failure.rollback.remaining(&failure.created);
    assert_eq!(remaining.len(), 7);
    assert_eq!(remaining[0], CreatedResource::SecurityGroup(String::from("sg-0007")));
}
