//! In-memory fakes for the workflow tests.

use std::{
    cell::{Cell, RefCell},
    collections::{BTreeMap, VecDeque},
    io,
};

use crate::{
    aws::{
        CreatedResource, DnsAttribute, Ec2Api, InstanceRequest, NetworkInterface,
        NetworkInterfaceRequest,
    },
    errors::{Error, Result},
    ingress::SecurityGroupRule,
    prompt::{is_affirmative, Confirm},
    state::{Kind, Record, StateRepository, FILE_SUFFIX},
};

/// Records every EC2 call and hands out sequential IDs.
/// Fails the call whose name equals "fail_on".
#[derive(Default)]
pub struct FakeEc2 {
    pub fail_on: Option<&'static str>,
    pub fail_deletes: bool,

    calls: RefCell<Vec<String>>,
    seq: Cell<usize>,

    pub rules: RefCell<Vec<SecurityGroupRule>>,
    pub instance_requests: RefCell<Vec<InstanceRequest>>,
    pub interface_requests: RefCell<Vec<NetworkInterfaceRequest>>,
    pub deleted: RefCell<Vec<CreatedResource>>,
}

impl FakeEc2 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(op: &'static str) -> Self {
        Self {
            fail_on: Some(op),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Returns the names of the calls, without arguments.
    pub fn ops(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c.split(' ').next().unwrap_or_default().to_string())
            .collect()
    }

    fn call(&self, op: &str, args: &[&str]) -> Result<()> {
        let mut line = op.to_string();
        for a in args {
            line.push(' ');
            line.push_str(a);
        }
        self.calls.borrow_mut().push(line);

        if self.fail_on == Some(op) {
            return Err(Error::API {
                message: format!("failed {} (injected)", op),
                is_retryable: false,
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        self.seq.set(self.seq.get() + 1);
        format!("{}-{:04}", prefix, self.seq.get())
    }
}

impl Ec2Api for FakeEc2 {
    async fn create_vpc(&self, cidr_block: &str, name: &str) -> Result<String> {
        self.call("create_vpc", &[cidr_block, name])?;
        Ok(self.next_id("vpc"))
    }

    async fn enable_vpc_dns(&self, vpc_id: &str, attribute: DnsAttribute) -> Result<()> {
        let attr = format!("{:?}", attribute);
        self.call("enable_vpc_dns", &[vpc_id, &attr])
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        name: &str,
    ) -> Result<String> {
        self.call("create_subnet", &[vpc_id, cidr_block, availability_zone, name])?;
        Ok(self.next_id("subnet"))
    }

    async fn create_dhcp_options(&self, domain_name: &str, name: &str) -> Result<String> {
        self.call("create_dhcp_options", &[domain_name, name])?;
        Ok(self.next_id("dopt"))
    }

    async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) -> Result<()> {
        self.call("associate_dhcp_options", &[dhcp_options_id, vpc_id])
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<String> {
        self.call("create_internet_gateway", &[name])?;
        Ok(self.next_id("igw"))
    }

    async fn attach_internet_gateway(
        &self,
        internet_gateway_id: &str,
        vpc_id: &str,
    ) -> Result<()> {
        self.call("attach_internet_gateway", &[internet_gateway_id, vpc_id])
    }

    async fn create_route_table(&self, vpc_id: &str, name: &str) -> Result<String> {
        self.call("create_route_table", &[vpc_id, name])?;
        Ok(self.next_id("rtb"))
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        internet_gateway_id: &str,
    ) -> Result<()> {
        self.call("create_default_route", &[route_table_id, internet_gateway_id])
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String> {
        self.call("associate_route_table", &[route_table_id, subnet_id])?;
        Ok(self.next_id("rtbassoc"))
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        _description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        self.call("create_security_group", &[group_name, vpc_id])?;
        Ok(self.next_id("sg"))
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[SecurityGroupRule]) -> Result<()> {
        self.call("authorize_ingress", &[group_id])?;
        self.rules.borrow_mut().extend_from_slice(rules);
        Ok(())
    }

    async fn create_network_interface(
        &self,
        req: &NetworkInterfaceRequest,
    ) -> Result<NetworkInterface> {
        self.call(
            "create_network_interface",
            &[&req.subnet_id, &req.security_group_id, &req.private_ip],
        )?;
        self.interface_requests.borrow_mut().push(req.clone());
        Ok(NetworkInterface {
            network_interface_id: self.next_id("eni"),
            private_ip: req.private_ip.clone(),
            vpc_id: String::from("vpc-0123"),
        })
    }

    async fn run_instance(&self, req: &InstanceRequest) -> Result<String> {
        self.call("run_instance", &[&req.name])?;
        self.instance_requests.borrow_mut().push(req.clone());
        Ok(self.next_id("i"))
    }

    async fn attach_network_interface(
        &self,
        network_interface_id: &str,
        instance_id: &str,
        device_index: i32,
    ) -> Result<String> {
        let index = device_index.to_string();
        self.call(
            "attach_network_interface",
            &[network_interface_id, instance_id, &index],
        )?;
        Ok(self.next_id("eni-attach"))
    }

    async fn delete_resource(&self, resource: &CreatedResource) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("delete_resource {}", resource));
        if self.fail_deletes {
            return Err(Error::API {
                message: format!("failed to delete {} (injected)", resource),
                is_retryable: false,
            });
        }
        self.deleted.borrow_mut().push(resource.clone());
        Ok(())
    }
}

/// Answers prompts from a fixed script, refusing once it runs out.
#[derive(Default)]
pub struct Scripted {
    answers: RefCell<VecDeque<String>>,
    asked: RefCell<Vec<String>>,
}

impl Scripted {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().map(|s| s.to_string()).collect()),
            asked: RefCell::new(Vec::new()),
        }
    }

    /// Returns the prompts shown so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked.borrow().clone()
    }
}

impl Confirm for Scripted {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        self.asked.borrow_mut().push(prompt.to_string());
        let answer = self.answers.borrow_mut().pop_front().unwrap_or_default();
        Ok(is_affirmative(&answer))
    }
}

/// Keeps records in memory, ordered by name.
#[derive(Default)]
pub struct MemoryRepository {
    records: RefCell<BTreeMap<String, Record>>,
    seq: Cell<usize>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under an explicit name.
    pub fn insert(&self, name: &str, record: Record) {
        self.records.borrow_mut().insert(name.to_string(), record);
    }

    pub fn records(&self, kind: Kind) -> Vec<(String, Record)> {
        let prefix = format!("{}_", kind.as_str());
        self.records
            .borrow()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl StateRepository for MemoryRepository {
    fn latest(&self, kind: Kind) -> Result<Option<(String, Record)>> {
        Ok(self.records(kind).pop())
    }

    fn save(&self, kind: Kind, record: &Record) -> Result<String> {
        self.seq.set(self.seq.get() + 1);
        let name = format!("{}_{:08}{}", kind.as_str(), self.seq.get(), FILE_SUFFIX);
        self.insert(&name, record.clone());
        Ok(name)
    }
}

#[test]
fn test_memory_repository() {
    let repo = MemoryRepository::new();
    let mut first = Record::new();
    first.insert("label", "first");
    let mut second = Record::new();
    second.insert("label", "second");

    repo.save(Kind::Network, &first).unwrap();
    repo.save(Kind::Network, &second).unwrap();

    let (_, latest) = repo.latest(Kind::Network).unwrap().unwrap();
    assert_eq!(latest.get("label"), Some("second"));
    assert!(repo.latest(Kind::Instance).unwrap().is_none());
}

#[test]
fn test_scripted() {
    let s = Scripted::new(&["yes", "nope"]);
    assert!(s.confirm("first").unwrap());
    assert!(!s.confirm("second").unwrap());
    assert!(!s.confirm("third").unwrap());
    assert_eq!(s.asked(), vec!["first", "second", "third"]);
}
