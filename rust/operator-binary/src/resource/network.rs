use std::net::IpAddr;

use ipnetwork::IpNetwork;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::{PodDNSConfig, PodDNSConfigOption};

use crate::crd::cluster::ClusterNetworkingConfig;

/// Service in the cluster namespace resolving names of the user cluster.
pub const DNS_RESOLVER_SERVICE_NAME: &str = "dns-resolver";
/// Pods using [`user_cluster_dns_config`] must set this DNS policy.
pub const USER_CLUSTER_DNS_POLICY: &str = "None";

/// Offset of the DNS resolver service IP inside the services network.
const DNS_RESOLVER_IP_OFFSET: u8 = 10;
/// Offset of the in-cluster `kubernetes` service IP inside the services network.
const APISERVER_IP_OFFSET: u8 = 1;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("cluster has no service CIDR blocks"))]
    NoServiceCidr,

    #[snafu(display("CIDR {cidr:?} has no prefix length"))]
    MissingPrefix { cidr: String },

    #[snafu(display("failed to parse CIDR {cidr:?}"))]
    ParseCidr {
        source: ipnetwork::IpNetworkError,
        cidr: String,
    },

    #[snafu(display("cluster network has an empty DNS domain"))]
    EmptyDnsDomain,
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Network address of a CIDR, e.g. `10.240.16.0` for `10.240.17.3/20`.
pub fn network_address(cidr: &str) -> Result<IpAddr> {
    ensure!(cidr.contains('/'), MissingPrefixSnafu { cidr });
    let network: IpNetwork = cidr.parse().context(ParseCidrSnafu { cidr })?;
    Ok(network.network())
}

/// The network address of the first service CIDR with `offset` added to its last byte.
fn first_service_ip_with_offset(network: &ClusterNetworkingConfig, offset: u8) -> Result<IpAddr> {
    let cidr = network
        .services
        .cidr_blocks
        .first()
        .context(NoServiceCidrSnafu)?;
    Ok(match network_address(cidr)? {
        IpAddr::V4(address) => {
            let mut octets = address.octets();
            octets[3] = octets[3].wrapping_add(offset);
            IpAddr::from(octets)
        }
        IpAddr::V6(address) => {
            let mut octets = address.octets();
            octets[15] = octets[15].wrapping_add(offset);
            IpAddr::from(octets)
        }
    })
}

/// IP of the DNS resolver service in the user cluster.
pub fn user_cluster_dns_resolver_ip(network: &ClusterNetworkingConfig) -> Result<IpAddr> {
    first_service_ip_with_offset(network, DNS_RESOLVER_IP_OFFSET)
}

/// IP of the `kubernetes` service in the user cluster.
pub fn in_cluster_apiserver_ip(network: &ClusterNetworkingConfig) -> Result<IpAddr> {
    first_service_ip_with_offset(network, APISERVER_IP_OFFSET)
}

/// DNS config for control-plane pods that must resolve user cluster service names through the
/// `dns-resolver` service.
pub fn user_cluster_dns_config(resolver_ip: &str, dns_domain: &str) -> Result<PodDNSConfig> {
    ensure!(!dns_domain.is_empty(), EmptyDnsDomainSnafu);
    Ok(PodDNSConfig {
        nameservers: Some(vec![resolver_ip.to_string()]),
        searches: Some(vec![
            format!("kube-system.svc.{dns_domain}"),
            format!("svc.{dns_domain}"),
            dns_domain.to_string(),
        ]),
        options: Some(vec![PodDNSConfigOption {
            name: Some("ndots".to_string()),
            value: Some("5".to_string()),
        }]),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::crd::cluster::NetworkRanges;

    fn network(blocks: &[&str]) -> ClusterNetworkingConfig {
        ClusterNetworkingConfig {
            services: NetworkRanges {
                cidr_blocks: blocks.iter().map(|b| b.to_string()).collect(),
            },
            ..ClusterNetworkingConfig::default()
        }
    }

    #[rstest]
    #[case(&["10.240.16.0/20"], "10.240.16.10", "10.240.16.1")]
    #[case(&["10.10.10.0/24", "10.20.0.0/16"], "10.10.10.10", "10.10.10.1")]
    #[case(&["10.240.17.77/20"], "10.240.16.10", "10.240.16.1")]
    #[case(&["fd00:10:96::/108"], "fd00:10:96::a", "fd00:10:96::1")]
    fn test_service_ips(#[case] blocks: &[&str], #[case] dns: &str, #[case] apiserver: &str) {
        let network = network(blocks);
        assert_eq!(
            user_cluster_dns_resolver_ip(&network).unwrap().to_string(),
            dns
        );
        assert_eq!(
            in_cluster_apiserver_ip(&network).unwrap().to_string(),
            apiserver
        );
    }

    #[test]
    fn test_no_service_cidr() {
        assert!(matches!(
            user_cluster_dns_resolver_ip(&network(&[])),
            Err(Error::NoServiceCidr)
        ));
    }

    #[rstest]
    #[case("10.0.0.0/33")]
    #[case("10.0.0.0/x")]
    #[case("fd00::/129")]
    #[case("not-an-ip/8")]
    fn test_malformed_cidr(#[case] cidr: &str) {
        assert!(matches!(
            network_address(cidr),
            Err(Error::ParseCidr { .. })
        ));
    }

    #[test]
    fn test_cidr_needs_prefix() {
        assert!(matches!(
            network_address("10.0.0.0"),
            Err(Error::MissingPrefix { .. })
        ));
    }

    #[rstest]
    #[case("10.1.2.3/0", "0.0.0.0")]
    #[case("10.1.2.3/16", "10.1.0.0")]
    #[case("fd00:10:96::17/64", "fd00:10:96::")]
    fn test_network_address(#[case] cidr: &str, #[case] expected: &str) {
        assert_eq!(network_address(cidr).unwrap().to_string(), expected);
    }

    #[test]
    fn test_user_cluster_dns_config() {
        let config = user_cluster_dns_config("10.47.248.7", "cluster.local").unwrap();
        assert_eq!(config.nameservers, Some(vec!["10.47.248.7".to_string()]));
        assert_eq!(
            config.searches.unwrap(),
            vec!["kube-system.svc.cluster.local", "svc.cluster.local", "cluster.local"]
        );
        assert_eq!(config.options.unwrap()[0].value.as_deref(), Some("5"));
    }

    #[test]
    fn test_user_cluster_dns_config_needs_domain() {
        assert!(matches!(
            user_cluster_dns_config("10.47.248.7", ""),
            Err(Error::EmptyDnsDomain)
        ));
    }
}
