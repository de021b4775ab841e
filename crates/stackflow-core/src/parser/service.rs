//! サービスノードのパース

use super::{first_arg, integer_prop, string_args};
use crate::error::{Result, StackError};
use crate::model::{BuildSpec, ReadinessSignal, ReadinessSpec, ServiceSpec};
use kdl::KdlNode;
use std::path::PathBuf;
use std::time::Duration;

/// service ノードをパース
pub fn parse_service(node: &KdlNode, project: &str) -> Result<ServiceSpec> {
    let name = first_arg(node)
        .ok_or_else(|| StackError::InvalidConfig("service requires a name".to_string()))?
        .to_string();

    let mut image: Option<String> = None;
    let mut service = ServiceSpec::new(name.clone(), String::new());

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "image" => {
                    image = first_arg(child).map(|s| s.to_string());
                }
                "depends-on" | "depends_on" => {
                    service.depends_on.extend(string_args(child));
                }
                "build" => {
                    service.build = Some(parse_build(child, &name)?);
                }
                "ready" => {
                    service.readiness = parse_readiness(child, &name)?;
                }
                other => {
                    tracing::debug!("Ignoring unknown node '{}' in service '{}'", other, name);
                }
            }
        }
    }

    // image 未指定なら {project}-{service}:latest
    service.image = image.unwrap_or_else(|| format!("{}-{}:latest", project, name));

    Ok(service)
}

/// build ノードをパース
///
/// ```kdl
/// build context="images" dockerfile="images/dashboard/Dockerfile" base-arg="BASE_IMAGE" {
///     args {
///         PYTHON_VERSION "3.11"
///     }
/// }
/// ```
fn parse_build(node: &KdlNode, service: &str) -> Result<BuildSpec> {
    let context = node
        .get("context")
        .and_then(|v| v.as_string())
        .or_else(|| first_arg(node))
        .unwrap_or(".");

    let mut build = BuildSpec::new(context);

    if let Some(dockerfile) = node.get("dockerfile").and_then(|v| v.as_string()) {
        build.dockerfile = Some(PathBuf::from(dockerfile));
    }
    if let Some(target) = node.get("target").and_then(|v| v.as_string()) {
        build.target = Some(target.to_string());
    }
    if let Some(base_arg) = node.get("base-arg").and_then(|v| v.as_string()) {
        if base_arg.is_empty() {
            return Err(StackError::InvalidConfig(format!(
                "service '{}': base-arg must not be empty",
                service
            )));
        }
        build.base_arg = base_arg.to_string();
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "args" => {
                    if let Some(args) = child.children() {
                        for arg_node in args.nodes() {
                            let key = arg_node.name().value().to_string();
                            let value = first_arg(arg_node).unwrap_or("").to_string();
                            build.args.insert(key, value);
                        }
                    }
                }
                "arg" => {
                    let values = string_args(child);
                    if let [key, value] = values.as_slice() {
                        build.args.insert(key.clone(), value.clone());
                    } else {
                        return Err(StackError::InvalidConfig(format!(
                            "service '{}': arg requires a key and a value",
                            service
                        )));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(build)
}

/// ready ノードをパース
///
/// ```kdl
/// ready "data-store" interval=2 timeout=60 {
///     command "pg_isready" "-U" "admin"
/// }
/// ready "http" url="https://localhost/admin/login/" timeout=120
/// ready "process"
/// ```
fn parse_readiness(node: &KdlNode, service: &str) -> Result<ReadinessSpec> {
    let kind = first_arg(node).unwrap_or("process");

    let signal = match kind {
        "none" => ReadinessSignal::None,
        "process" => ReadinessSignal::Process,
        "data-store" | "datastore" => {
            let mut command: Vec<String> = node
                .children()
                .and_then(|c| c.nodes().iter().find(|n| n.name().value() == "command"))
                .map(string_args)
                .unwrap_or_default();
            if command.is_empty()
                && let Some(line) = node.get("command").and_then(|v| v.as_string())
            {
                command = line.split_whitespace().map(|s| s.to_string()).collect();
            }
            if command.is_empty() {
                return Err(StackError::InvalidConfig(format!(
                    "service '{}': data-store readiness requires a command",
                    service
                )));
            }
            ReadinessSignal::DataStore { command }
        }
        "http" | "http-endpoint" => {
            let url = node
                .get("url")
                .and_then(|v| v.as_string())
                .ok_or_else(|| {
                    StackError::InvalidConfig(format!(
                        "service '{}': http readiness requires url=",
                        service
                    ))
                })?
                .to_string();
            ReadinessSignal::HttpEndpoint { url }
        }
        other => {
            return Err(StackError::InvalidConfig(format!(
                "service '{}': unknown readiness signal '{}'",
                service, other
            )));
        }
    };

    let interval = integer_prop(node, "interval")?.map(Duration::from_secs);
    let timeout = integer_prop(node, "timeout")?.map(Duration::from_secs);

    if interval == Some(Duration::ZERO) {
        return Err(StackError::InvalidConfig(format!(
            "service '{}': ready interval must be at least 1 second",
            service
        )));
    }

    Ok(ReadinessSpec {
        signal,
        interval,
        timeout,
    })
}
