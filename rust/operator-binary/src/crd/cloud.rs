use serde::{Deserialize, Serialize};
use stackable_operator::schemars::{self, JsonSchema};
use strum::{Display, EnumString};

/// Feature flag that moves vSphere clusters to the out-of-tree cloud provider.
pub const FEATURE_EXTERNAL_CLOUD_PROVIDER: &str = "externalCloudProvider";

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Bringyourown,
    Digitalocean,
    Gcp,
    Hetzner,
    Openstack,
    Vsphere,
}

/// Cloud specification of a user cluster. Exactly one provider is expected to be set.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudSpec {
    /// Name of the datacenter the cluster runs in.
    #[serde(default)]
    pub dc: String,

    /// Secret holding the provider credentials, made available to addon templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_reference: Option<SecretReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bringyourown: Option<BringYourOwnCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digitalocean: Option<DigitaloceanCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hetzner: Option<HetznerCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openstack: Option<OpenstackCloudSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsphere: Option<VSphereCloudSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCloudSpec {
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub route_table_id: String,
    #[serde(default)]
    pub security_group_id: String,
    #[serde(default)]
    pub instance_profile_name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCloudSpec {
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub vnet: String,
    #[serde(default)]
    pub subnet: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct BringYourOwnCloudSpec {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct DigitaloceanCloudSpec {}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpCloudSpec {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub subnetwork: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HetznerCloudSpec {
    #[serde(default)]
    pub network: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenstackCloudSpec {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub floating_ip_pool: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VSphereCloudSpec {
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub datastore: String,
}

impl CloudSpec {
    pub fn provider(&self) -> Option<CloudProvider> {
        if self.aws.is_some() {
            Some(CloudProvider::Aws)
        } else if self.azure.is_some() {
            Some(CloudProvider::Azure)
        } else if self.bringyourown.is_some() {
            Some(CloudProvider::Bringyourown)
        } else if self.digitalocean.is_some() {
            Some(CloudProvider::Digitalocean)
        } else if self.gcp.is_some() {
            Some(CloudProvider::Gcp)
        } else if self.hetzner.is_some() {
            Some(CloudProvider::Hetzner)
        } else if self.openstack.is_some() {
            Some(CloudProvider::Openstack)
        } else if self.vsphere.is_some() {
            Some(CloudProvider::Vsphere)
        } else {
            None
        }
    }

    /// Value for the `--cloud-provider` flag of Kubernetes components, `None` when the flag
    /// must be omitted.
    pub fn kubernetes_cloud_provider_name(&self, external_cloud_provider: bool) -> Option<&'static str> {
        match self.provider()? {
            CloudProvider::Aws => Some("aws"),
            CloudProvider::Azure => Some("azure"),
            CloudProvider::Gcp => Some("gce"),
            CloudProvider::Openstack => Some("openstack"),
            CloudProvider::Vsphere if external_cloud_provider => Some("external"),
            CloudProvider::Vsphere => Some("vsphere"),
            CloudProvider::Bringyourown | CloudProvider::Digitalocean | CloudProvider::Hetzner => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("aws: {}", false, Some("aws"))]
    #[case("azure: {}", false, Some("azure"))]
    #[case("gcp: {}", false, Some("gce"))]
    #[case("openstack: {}", false, Some("openstack"))]
    #[case("vsphere: {}", false, Some("vsphere"))]
    #[case("vsphere: {}", true, Some("external"))]
    #[case("hetzner: {}", false, None)]
    #[case("bringyourown: {}", false, None)]
    #[case("dc: somewhere", false, None)]
    fn test_kubernetes_cloud_provider_name(
        #[case] input: &str,
        #[case] external: bool,
        #[case] expected: Option<&str>,
    ) {
        let cloud: CloudSpec = serde_yaml::from_str(input).expect("illegal test input");
        assert_eq!(cloud.kubernetes_cloud_provider_name(external), expected);
    }

    #[test]
    fn test_provider_display() {
        let cloud: CloudSpec =
            serde_yaml::from_str("openstack:\n  tenant: demo").expect("illegal test input");
        assert_eq!(cloud.provider().unwrap().to_string(), "openstack");
    }
}
