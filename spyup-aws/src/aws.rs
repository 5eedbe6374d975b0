use std::fmt;

use aws_manager::{self, ec2, sts};
use aws_sdk_ec2::types::{
    AttributeBooleanValue, BlockDeviceMapping, EbsBlockDevice, InstanceNetworkInterfaceSpecification,
    InstanceStateName, InstanceType, IpPermission, IpRange, NewDhcpConfiguration, Placement,
    ResourceType, Tag, TagSpecification, UserIdGroupPair, VolumeType,
};
use aws_types::SdkConfig;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::{
    errors::{self, Error, Result},
    ingress::SecurityGroupRule,
};

/// VPC attributes toggled after creation.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DnsAttribute {
    Support,
    Hostnames,
}

/// Request to create a network interface.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NetworkInterfaceRequest {
    pub subnet_id: String,
    pub security_group_id: String,
    pub private_ip: String,
    pub description: String,
}

/// Network interface returned by the provider.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NetworkInterface {
    pub network_interface_id: String,
    pub private_ip: String,
    pub vpc_id: String,
}

/// Decides how the launched instance is wired to the network.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceMode {
    /// Only the pre-created interface, at device index 0.
    #[default]
    Attached,
    /// A new public primary interface at device index 0.
    /// The pre-created interface is attached at device index 1
    /// once the instance is running.
    DualHomed,
}

impl InterfaceMode {
    pub fn as_str(&self) -> &str {
        match self {
            InterfaceMode::Attached => "attached",
            InterfaceMode::DualHomed => "dual-homed",
        }
    }

    pub fn values() -> &'static [&'static str] {
        &["attached", "dual-homed"]
    }
}

impl std::str::FromStr for InterfaceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attached" => Ok(InterfaceMode::Attached),
            "dual-homed" => Ok(InterfaceMode::DualHomed),
            other => Err(errors::config(format!("unknown interface mode '{}'", other))),
        }
    }
}

/// One network interface of an instance request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InstanceInterface {
    /// Attaches an existing interface.
    Existing {
        device_index: i32,
        network_interface_id: String,
    },
    /// Creates a new interface, auto-deleted with the instance.
    New {
        device_index: i32,
        subnet_id: String,
        security_group_id: String,
    },
}

/// Extra EBS volume of the spy instance.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Volume {
    pub device_name: String,
    pub size_in_gb: i32,
    pub volume_type: String,
}

/// Request to launch exactly one instance.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InstanceRequest {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub availability_zone: String,
    /// Raw boot script, encoded when sent.
    pub user_data: String,
    pub volume: Volume,
    pub interfaces: Vec<InstanceInterface>,
}

/// Resource created during a run, in the order of creation.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CreatedResource {
    Vpc(String),
    Subnet(String),
    DhcpOptions { id: String, vpc_id: Option<String> },
    InternetGateway { id: String, vpc_id: Option<String> },
    RouteTable(String),
    RouteTableAssociation(String),
    SecurityGroup(String),
    NetworkInterface(String),
    Instance(String),
}

impl CreatedResource {
    /// Returns the AWS CLI command(s) the operator can run to delete it.
    pub fn delete_command(&self) -> String {
        match self {
            CreatedResource::Vpc(id) => format!("aws ec2 delete-vpc --vpc-id {}", id),
            CreatedResource::Subnet(id) => format!("aws ec2 delete-subnet --subnet-id {}", id),
            CreatedResource::DhcpOptions { id, vpc_id } => match vpc_id {
                Some(vpc_id) => format!(
                    "aws ec2 associate-dhcp-options --dhcp-options-id default --vpc-id {} && aws ec2 delete-dhcp-options --dhcp-options-id {}",
                    vpc_id, id
                ),
                None => format!("aws ec2 delete-dhcp-options --dhcp-options-id {}", id),
            },
            CreatedResource::InternetGateway { id, vpc_id } => match vpc_id {
                Some(vpc_id) => format!(
                    "aws ec2 detach-internet-gateway --internet-gateway-id {} --vpc-id {} && aws ec2 delete-internet-gateway --internet-gateway-id {}",
                    id, vpc_id, id
                ),
                None => format!("aws ec2 delete-internet-gateway --internet-gateway-id {}", id),
            },
            CreatedResource::RouteTable(id) => {
                format!("aws ec2 delete-route-table --route-table-id {}", id)
            }
            CreatedResource::RouteTableAssociation(id) => {
                format!("aws ec2 disassociate-route-table --association-id {}", id)
            }
            CreatedResource::SecurityGroup(id) => {
                format!("aws ec2 delete-security-group --group-id {}", id)
            }
            CreatedResource::NetworkInterface(id) => format!(
                "aws ec2 delete-network-interface --network-interface-id {}",
                id
            ),
            CreatedResource::Instance(id) => {
                format!("aws ec2 terminate-instances --instance-ids {}", id)
            }
        }
    }
}

impl fmt::Display for CreatedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreatedResource::Vpc(id) => write!(f, "VPC {}", id),
            CreatedResource::Subnet(id) => write!(f, "subnet {}", id),
            CreatedResource::DhcpOptions { id, .. } => write!(f, "DHCP options {}", id),
            CreatedResource::InternetGateway { id, .. } => write!(f, "internet gateway {}", id),
            CreatedResource::RouteTable(id) => write!(f, "route table {}", id),
            CreatedResource::RouteTableAssociation(id) => {
                write!(f, "route table association {}", id)
            }
            CreatedResource::SecurityGroup(id) => write!(f, "security group {}", id),
            CreatedResource::NetworkInterface(id) => write!(f, "network interface {}", id),
            CreatedResource::Instance(id) => write!(f, "instance {}", id),
        }
    }
}

/// EC2 calls made by the provisioning workflows.
/// Every call is awaited before the next one is issued.
#[allow(async_fn_in_trait)]
pub trait Ec2Api {
    async fn create_vpc(&self, cidr_block: &str, name: &str) -> Result<String>;
    async fn enable_vpc_dns(&self, vpc_id: &str, attribute: DnsAttribute) -> Result<()>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        name: &str,
    ) -> Result<String>;
    async fn create_dhcp_options(&self, domain_name: &str, name: &str) -> Result<String>;
    async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) -> Result<()>;
    async fn create_internet_gateway(&self, name: &str) -> Result<String>;
    async fn attach_internet_gateway(&self, internet_gateway_id: &str, vpc_id: &str)
        -> Result<()>;
    async fn create_route_table(&self, vpc_id: &str, name: &str) -> Result<String>;
    async fn create_default_route(&self, route_table_id: &str, internet_gateway_id: &str)
        -> Result<()>;
    /// Returns the association ID.
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> Result<String>;
    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String>;
    async fn authorize_ingress(&self, group_id: &str, rules: &[SecurityGroupRule]) -> Result<()>;
    async fn create_network_interface(
        &self,
        req: &NetworkInterfaceRequest,
    ) -> Result<NetworkInterface>;
    /// Returns the instance ID.
    async fn run_instance(&self, req: &InstanceRequest) -> Result<String>;
    /// Attaches an existing interface to a launched instance
    /// once it is running. Returns the attachment ID.
    async fn attach_network_interface(
        &self,
        network_interface_id: &str,
        instance_id: &str,
        device_index: i32,
    ) -> Result<String>;
    /// Deletes (or detaches, disassociates, terminates) a created resource.
    async fn delete_resource(&self, resource: &CreatedResource) -> Result<()>;
}

/// Loads the shared AWS configuration for the region
/// and logs the caller identity.
pub async fn load(region: &str) -> Result<SdkConfig> {
    let shared_config =
        aws_manager::load_config(Some(region.to_string()), None, Some(Duration::from_secs(30))).await;

    let sts_manager = sts::Manager::new(&shared_config);
    let identity = sts_manager.get_identity().await.map_err(|e| Error::API {
        message: format!("failed get_identity {}", e),
        is_retryable: false,
    })?;
    log::info!("current identity {:?}", identity);

    Ok(shared_config)
}

/// Implements "Ec2Api" on top of the AWS SDK client.
pub struct Ec2 {
    manager: ec2::Manager,
}

impl Ec2 {
    pub fn new(shared_config: &SdkConfig) -> Self {
        Self {
            manager: ec2::Manager::new(shared_config),
        }
    }
}

fn tags(resource_type: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

fn missing(op: &str, field: &str) -> Error {
    Error::API {
        message: format!("{} response is missing '{}'", op, field),
        is_retryable: false,
    }
}

/// Maps the launch-time interfaces to the EC2 request shape.
/// An existing interface never carries "DeleteOnTermination" and a public
/// address is only requested when the instance has a single interface.
pub fn network_interface_specs(
    interfaces: &[InstanceInterface],
) -> Vec<InstanceNetworkInterfaceSpecification> {
    let single = interfaces.len() == 1;
    let mut specs: Vec<InstanceNetworkInterfaceSpecification> = Vec::new();
    for i in interfaces.iter() {
        let spec = match i {
            InstanceInterface::Existing {
                device_index,
                network_interface_id,
            } => InstanceNetworkInterfaceSpecification::builder()
                .device_index(*device_index)
                .network_interface_id(network_interface_id.as_str())
                .build(),
            InstanceInterface::New {
                device_index,
                subnet_id,
                security_group_id,
            } => {
                let mut b = InstanceNetworkInterfaceSpecification::builder()
                    .device_index(*device_index)
                    .subnet_id(subnet_id.as_str())
                    .groups(security_group_id.as_str())
                    .delete_on_termination(true);
                if single {
                    b = b.associate_public_ip_address(true);
                }
                b.build()
            }
        };
        specs.push(spec);
    }
    specs
}

/// Polls every 5 seconds for up to 5 minutes.
const INSTANCE_RUNNING_POLLS: u32 = 60;

impl Ec2 {
    async fn wait_running(&self, instance_id: &str) -> Result<()> {
        for poll in 0..INSTANCE_RUNNING_POLLS {
            let resp = self
                .manager
                .cli
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|e| errors::api("describe_instances", e))?;
            let state = resp
                .reservations()
                .unwrap_or_default()
                .iter()
                .flat_map(|r| r.instances().unwrap_or_default().iter())
                .find_map(|i| i.state().and_then(|s| s.name()).cloned());
            log::info!("instance {} state {:?} (poll {})", instance_id, state, poll);
            match state {
                Some(InstanceStateName::Running) => return Ok(()),
                Some(InstanceStateName::Pending) | None => {}
                Some(other) => {
                    return Err(Error::API {
                        message: format!("instance {} is {:?}, not running", instance_id, other),
                        is_retryable: false,
                    })
                }
            }
            sleep(Duration::from_secs(5)).await;
        }
        Err(Error::API {
            message: format!("instance {} did not reach running", instance_id),
            is_retryable: true,
        })
    }
}

impl Ec2Api for Ec2 {
    async fn create_vpc(&self, cidr_block: &str, name: &str) -> Result<String> {
        log::info!("creating VPC '{}' with CIDR {}", name, cidr_block);
        let resp = self
            .manager
            .cli
            .create_vpc()
            .cidr_block(cidr_block)
            .tag_specifications(tags(ResourceType::Vpc, name))
            .send()
            .await
            .map_err(|e| errors::api("create_vpc", e))?;
        let vpc_id = resp
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| missing("create_vpc", "vpc_id"))?;
        Ok(vpc_id.to_string())
    }

    async fn enable_vpc_dns(&self, vpc_id: &str, attribute: DnsAttribute) -> Result<()> {
        log::info!("enabling DNS {:?} on VPC {}", attribute, vpc_id);
        let enabled = AttributeBooleanValue::builder().value(true).build();
        let req = self.manager.cli.modify_vpc_attribute().vpc_id(vpc_id);
        let req = match attribute {
            DnsAttribute::Support => req.enable_dns_support(enabled),
            DnsAttribute::Hostnames => req.enable_dns_hostnames(enabled),
        };
        req.send()
            .await
            .map_err(|e| errors::api("modify_vpc_attribute", e))?;
        Ok(())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: &str,
        name: &str,
    ) -> Result<String> {
        log::info!(
            "creating subnet '{}' with CIDR {} in {}",
            name,
            cidr_block,
            availability_zone
        );
        let resp = self
            .manager
            .cli
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr_block)
            .availability_zone(availability_zone)
            .tag_specifications(tags(ResourceType::Subnet, name))
            .send()
            .await
            .map_err(|e| errors::api("create_subnet", e))?;
        let subnet_id = resp
            .subnet()
            .and_then(|s| s.subnet_id())
            .ok_or_else(|| missing("create_subnet", "subnet_id"))?;
        Ok(subnet_id.to_string())
    }

    async fn create_dhcp_options(&self, domain_name: &str, name: &str) -> Result<String> {
        log::info!("creating DHCP options '{}' for domain {}", name, domain_name);
        let resp = self
            .manager
            .cli
            .create_dhcp_options()
            .dhcp_configurations(
                NewDhcpConfiguration::builder()
                    .key("domain-name-servers")
                    .values("AmazonProvidedDNS")
                    .build(),
            )
            .dhcp_configurations(
                NewDhcpConfiguration::builder()
                    .key("domain-name")
                    .values(domain_name)
                    .build(),
            )
            .tag_specifications(tags(ResourceType::DhcpOptions, name))
            .send()
            .await
            .map_err(|e| errors::api("create_dhcp_options", e))?;
        let id = resp
            .dhcp_options()
            .and_then(|d| d.dhcp_options_id())
            .ok_or_else(|| missing("create_dhcp_options", "dhcp_options_id"))?;
        Ok(id.to_string())
    }

    async fn associate_dhcp_options(&self, dhcp_options_id: &str, vpc_id: &str) -> Result<()> {
        log::info!("associating DHCP options {} with {}", dhcp_options_id, vpc_id);
        self.manager
            .cli
            .associate_dhcp_options()
            .dhcp_options_id(dhcp_options_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| errors::api("associate_dhcp_options", e))?;
        Ok(())
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<String> {
        log::info!("creating internet gateway '{}'", name);
        let resp = self
            .manager
            .cli
            .create_internet_gateway()
            .tag_specifications(tags(ResourceType::InternetGateway, name))
            .send()
            .await
            .map_err(|e| errors::api("create_internet_gateway", e))?;
        let id = resp
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .ok_or_else(|| missing("create_internet_gateway", "internet_gateway_id"))?;
        Ok(id.to_string())
    }

    async fn attach_internet_gateway(
        &self,
        internet_gateway_id: &str,
        vpc_id: &str,
    ) -> Result<()> {
        log::info!("attaching internet gateway {} to {}", internet_gateway_id, vpc_id);
        self.manager
            .cli
            .attach_internet_gateway()
            .internet_gateway_id(internet_gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| errors::api("attach_internet_gateway", e))?;
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str, name: &str) -> Result<String> {
        log::info!("creating route table '{}' in {}", name, vpc_id);
        let resp = self
            .manager
            .cli
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(tags(ResourceType::RouteTable, name))
            .send()
            .await
            .map_err(|e| errors::api("create_route_table", e))?;
        let id = resp
            .route_table()
            .and_then(|r| r.route_table_id())
            .ok_or_else(|| missing("create_route_table", "route_table_id"))?;
        Ok(id.to_string())
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        internet_gateway_id: &str,
    ) -> Result<()> {
        log::info!(
            "routing 0.0.0.0/0 in {} through {}",
            route_table_id,
            internet_gateway_id
        );
        self.manager
            .cli
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id(internet_gateway_id)
            .send()
            .await
            .map_err(|e| errors::api("create_route", e))?;
        Ok(())
    }

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str) -> Result<String> {
        log::info!("associating route table {} with {}", route_table_id, subnet_id);
        let resp = self
            .manager
            .cli
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| errors::api("associate_route_table", e))?;
        let id = resp
            .association_id()
            .ok_or_else(|| missing("associate_route_table", "association_id"))?;
        Ok(id.to_string())
    }

    async fn create_security_group(
        &self,
        group_name: &str,
        description: &str,
        vpc_id: &str,
    ) -> Result<String> {
        log::info!("creating security group '{}' in {}", group_name, vpc_id);
        let resp = self
            .manager
            .cli
            .create_security_group()
            .group_name(group_name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(tags(ResourceType::SecurityGroup, group_name))
            .send()
            .await
            .map_err(|e| errors::api("create_security_group", e))?;
        let id = resp
            .group_id()
            .ok_or_else(|| missing("create_security_group", "group_id"))?;
        Ok(id.to_string())
    }

    async fn authorize_ingress(&self, group_id: &str, rules: &[SecurityGroupRule]) -> Result<()> {
        let mut permissions: Vec<IpPermission> = Vec::new();
        for r in rules.iter() {
            let mut b = IpPermission::builder()
                .ip_protocol(r.ip_protocol.as_str())
                .from_port(r.from_port)
                .to_port(r.to_port);
            for cidr in r.cidrs() {
                b = b.ip_ranges(IpRange::builder().cidr_ip(cidr).build());
            }
            for g in r.groups() {
                b = b.user_id_group_pairs(UserIdGroupPair::builder().group_id(g).build());
            }
            permissions.push(b.build());
        }

        log::info!(
            "authorizing {} ingress permission(s) on {}",
            permissions.len(),
            group_id
        );
        self.manager
            .cli
            .authorize_security_group_ingress()
            .group_id(group_id)
            .set_ip_permissions(Some(permissions))
            .send()
            .await
            .map_err(|e| errors::api("authorize_security_group_ingress", e))?;
        Ok(())
    }

    async fn create_network_interface(
        &self,
        req: &NetworkInterfaceRequest,
    ) -> Result<NetworkInterface> {
        log::info!(
            "creating network interface {} in {}",
            req.private_ip,
            req.subnet_id
        );
        let resp = self
            .manager
            .cli
            .create_network_interface()
            .subnet_id(req.subnet_id.as_str())
            .groups(req.security_group_id.as_str())
            .private_ip_address(req.private_ip.as_str())
            .description(req.description.as_str())
            .send()
            .await
            .map_err(|e| errors::api("create_network_interface", e))?;
        let ni = resp
            .network_interface()
            .ok_or_else(|| missing("create_network_interface", "network_interface"))?;
        Ok(NetworkInterface {
            network_interface_id: ni
                .network_interface_id()
                .ok_or_else(|| missing("create_network_interface", "network_interface_id"))?
                .to_string(),
            private_ip: ni.private_ip_address().unwrap_or(&req.private_ip).to_string(),
            vpc_id: ni.vpc_id().unwrap_or_default().to_string(),
        })
    }

    async fn run_instance(&self, req: &InstanceRequest) -> Result<String> {
        log::info!(
            "launching {} ({}) as '{}' with {} interface(s)",
            req.image_id,
            req.instance_type,
            req.name,
            req.interfaces.len()
        );

        let mut b = self
            .manager
            .cli
            .run_instances()
            .image_id(req.image_id.as_str())
            .instance_type(InstanceType::from(req.instance_type.as_str()))
            .min_count(1)
            .max_count(1)
            .user_data(base64::engine::general_purpose::STANDARD.encode(&req.user_data))
            .placement(
                Placement::builder()
                    .availability_zone(req.availability_zone.as_str())
                    .build(),
            )
            .block_device_mappings(
                BlockDeviceMapping::builder()
                    .device_name(req.volume.device_name.as_str())
                    .ebs(
                        EbsBlockDevice::builder()
                            .delete_on_termination(false)
                            .volume_size(req.volume.size_in_gb)
                            .volume_type(VolumeType::from(req.volume.volume_type.as_str()))
                            .build(),
                    )
                    .build(),
            )
            .set_network_interfaces(Some(network_interface_specs(&req.interfaces)))
            .tag_specifications(tags(ResourceType::Instance, &req.name));
        if let Some(key_name) = &req.key_name {
            b = b.key_name(key_name.as_str());
        }

        let resp = b.send().await.map_err(|e| errors::api("run_instances", e))?;
        let instance_id = resp
            .instances()
            .unwrap_or_default()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| missing("run_instances", "instance_id"))?;
        Ok(instance_id.to_string())
    }

    async fn attach_network_interface(
        &self,
        network_interface_id: &str,
        instance_id: &str,
        device_index: i32,
    ) -> Result<String> {
        self.wait_running(instance_id).await?;

        log::info!(
            "attaching {} to {} at device index {}",
            network_interface_id,
            instance_id,
            device_index
        );
        let resp = self
            .manager
            .cli
            .attach_network_interface()
            .network_interface_id(network_interface_id)
            .instance_id(instance_id)
            .device_index(device_index)
            .send()
            .await
            .map_err(|e| errors::api("attach_network_interface", e))?;
        let id = resp
            .attachment_id()
            .ok_or_else(|| missing("attach_network_interface", "attachment_id"))?;
        Ok(id.to_string())
    }

    async fn delete_resource(&self, resource: &CreatedResource) -> Result<()> {
        log::info!("deleting {}", resource);
        let cli = &self.manager.cli;
        match resource {
            CreatedResource::Vpc(id) => {
                cli.delete_vpc()
                    .vpc_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_vpc", e))?;
            }
            CreatedResource::Subnet(id) => {
                cli.delete_subnet()
                    .subnet_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_subnet", e))?;
            }
            CreatedResource::DhcpOptions { id, vpc_id } => {
                if let Some(vpc_id) = vpc_id {
                    cli.associate_dhcp_options()
                        .dhcp_options_id("default")
                        .vpc_id(vpc_id)
                        .send()
                        .await
                        .map_err(|e| errors::api("associate_dhcp_options", e))?;
                }
                cli.delete_dhcp_options()
                    .dhcp_options_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_dhcp_options", e))?;
            }
            CreatedResource::InternetGateway { id, vpc_id } => {
                if let Some(vpc_id) = vpc_id {
                    cli.detach_internet_gateway()
                        .internet_gateway_id(id)
                        .vpc_id(vpc_id)
                        .send()
                        .await
                        .map_err(|e| errors::api("detach_internet_gateway", e))?;
                }
                cli.delete_internet_gateway()
                    .internet_gateway_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_internet_gateway", e))?;
            }
            CreatedResource::RouteTable(id) => {
                cli.delete_route_table()
                    .route_table_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_route_table", e))?;
            }
            CreatedResource::RouteTableAssociation(id) => {
                cli.disassociate_route_table()
                    .association_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("disassociate_route_table", e))?;
            }
            CreatedResource::SecurityGroup(id) => {
                cli.delete_security_group()
                    .group_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_security_group", e))?;
            }
            CreatedResource::NetworkInterface(id) => {
                cli.delete_network_interface()
                    .network_interface_id(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("delete_network_interface", e))?;
            }
            CreatedResource::Instance(id) => {
                cli.terminate_instances()
                    .instance_ids(id)
                    .send()
                    .await
                    .map_err(|e| errors::api("terminate_instances", e))?;
            }
        }
        Ok(())
    }
}

#[test]
fn test_delete_command() {
    assert_eq!(
        CreatedResource::NetworkInterface(String::from("eni-0123")).delete_command(),
        "aws ec2 delete-network-interface --network-interface-id eni-0123"
    );
    assert_eq!(
        CreatedResource::InternetGateway {
            id: String::from("igw-1"),
            vpc_id: Some(String::from("vpc-1")),
        }
        .delete_command(),
        "aws ec2 detach-internet-gateway --internet-gateway-id igw-1 --vpc-id vpc-1 && aws ec2 delete-internet-gateway --internet-gateway-id igw-1"
    );
    assert_eq!(
        CreatedResource::DhcpOptions {
            id: String::from("dopt-1"),
            vpc_id: None,
        }
        .delete_command(),
        "aws ec2 delete-dhcp-options --dhcp-options-id dopt-1"
    );
    assert_eq!(
        CreatedResource::Instance(String::from("i-1")).to_string(),
        "instance i-1"
    );
}

#[test]
fn test_interface_mode() {
    use std::str::FromStr;

    assert_eq!(InterfaceMode::default(), InterfaceMode::Attached);
    for v in InterfaceMode::values() {
        assert_eq!(InterfaceMode::from_str(v).unwrap().as_str(), *v);
    }
    assert!(InterfaceMode::from_str("triple").unwrap_err().is_config());
    assert_eq!(
        serde_yaml::to_string(&InterfaceMode::DualHomed).unwrap().trim(),
        "dual-homed"
    );
}

#[test]
fn test_network_interface_specs() {
    // existing interface at index 0, as launched by default
    let specs = network_interface_specs(&[InstanceInterface::Existing {
        device_index: 0,
        network_interface_id: String::from("eni-0123"),
    }]);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].device_index(), Some(0));
    assert_eq!(specs[0].network_interface_id(), Some("eni-0123"));
    assert_eq!(specs[0].delete_on_termination(), None);
    assert_eq!(specs[0].associate_public_ip_address(), None);

    // new primary interface launched alone gets a public address
    let new = InstanceInterface::New {
        device_index: 0,
        subnet_id: String::from("subnet-0123"),
        security_group_id: String::from("sg-0123"),
    };
    let specs = network_interface_specs(&[new.clone()]);
    assert_eq!(specs[0].subnet_id(), Some("subnet-0123"));
    assert_eq!(specs[0].groups(), Some(&[String::from("sg-0123")][..]));
    assert_eq!(specs[0].delete_on_termination(), Some(true));
    assert_eq!(specs[0].associate_public_ip_address(), Some(true));

    // EC2 refuses a public address once more than one interface is sent
    let specs = network_interface_specs(&[
        new,
        InstanceInterface::Existing {
            device_index: 1,
            network_interface_id: String::from("eni-0123"),
        },
    ]);
    assert_eq!(specs.len(), 2);
    assert_eq!(specs[0].associate_public_ip_address(), None);
    assert_eq!(specs[1].delete_on_termination(), None);
}
