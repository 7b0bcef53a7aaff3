use std::path::Path;

use quick_xml::de::from_str;
use tracing::warn;

use super::{read_optional, ServicePort};
use crate::error::ParseError;

#[derive(Debug, serde::Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<NmapHost>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapHost {
    #[serde(default)]
    ports: Option<NmapPorts>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapPorts {
    #[serde(rename = "port", default)]
    ports: Vec<NmapPort>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapPort {
    #[serde(rename = "@portid", default)]
    portid: String,
    #[serde(rename = "@protocol", default)]
    protocol: String,
    #[serde(default)]
    state: Option<NmapState>,
    #[serde(default)]
    service: Option<NmapService>,
}

#[derive(Debug, serde::Deserialize)]
struct NmapState {
    #[serde(rename = "@state", default)]
    state: String,
}

#[derive(Debug, serde::Deserialize)]
struct NmapService {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@product", default)]
    product: Option<String>,
}

/// Open ports of every host in an nmap XML report. Closed and filtered ports
/// are dropped; a port with an unusable port id is logged and skipped.
pub fn parse_nmap_xml(xml: &str) -> Result<Vec<ServicePort>, ParseError> {
    let run: NmapRun = from_str(xml)?;
    let mut services = Vec::new();

    for host in run.hosts {
        let Some(ports) = host.ports else {
            continue;
        };
        for p in ports.ports {
            let open = p.state.as_ref().is_some_and(|s| s.state == "open");
            if !open {
                continue;
            }
            let port = match p.portid.trim().parse::<u16>() {
                Ok(port) => port,
                Err(e) => {
                    let err = ParseError::Field {
                        field: "portid",
                        reason: format!("{:?}: {e}", p.portid),
                    };
                    warn!(source = "nmap", error = %err, "skipping malformed port");
                    continue;
                }
            };
            let (service, product) = match p.service {
                Some(s) => (s.name, s.product.filter(|v| !v.trim().is_empty())),
                None => (String::new(), None),
            };
            services.push(ServicePort {
                port,
                protocol: p.protocol,
                service,
                product,
            });
        }
    }

    Ok(services)
}

pub fn parse_nmap_file(path: &Path) -> Vec<ServicePort> {
    let Some(xml) = read_optional(path) else {
        return Vec::new();
    };
    match parse_nmap_xml(&xml) {
        Ok(services) => services,
        Err(e) => {
            warn!(source = "nmap", path = %path.display(), error = %e, "unparseable host/service report");
            Vec::new()
        }
    }
}
