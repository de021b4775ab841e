use super::*;
use crate::model::{ReadinessSignal, DEFAULT_BASE_ARG};
use std::time::Duration;

fn parse(kdl: &str) -> Result<StackManifest> {
    parse_manifest_str(kdl, PathBuf::from("/srv/stack"))
}

#[test]
fn test_parse_minimal_manifest() {
    let kdl = r#"
        project "demo"
        service "redis" {
            image "redis:7-alpine"
        }
    "#;

    let manifest = parse(kdl).unwrap();
    assert_eq!(manifest.project, "demo");
    assert_eq!(manifest.root, PathBuf::from("/srv/stack"));
    assert_eq!(manifest.compose_file, PathBuf::from("docker-compose.yml"));
    assert_eq!(manifest.env_file, PathBuf::from(".env"));
    assert_eq!(manifest.min_disk_gb, 5);
    assert_eq!(manifest.recommended_disk_gb, 10);
    assert_eq!(manifest.services.len(), 1);
    assert_eq!(manifest.services[0].image, "redis:7-alpine");
    assert!(manifest.services[0].build.is_none());
}

#[test]
fn test_parse_project_is_required() {
    let kdl = r#"
        service "redis" {
            image "redis:7-alpine"
        }
    "#;

    assert!(matches!(parse(kdl), Err(StackError::InvalidConfig(_))));
}

#[test]
fn test_parse_image_defaults_to_project_naming() {
    let kdl = r#"
        project "demo"
        service "worker" {}
    "#;

    let manifest = parse(kdl).unwrap();
    assert_eq!(manifest.services[0].image, "demo-worker:latest");
}

#[test]
fn test_parse_build_and_dependencies() {
    let kdl = r#"
        project "demo"
        service "base" {
            image "demo/base:latest"
            build context="images" dockerfile="images/base/Dockerfile"
        }
        service "dashboard" {
            image "demo/dashboard:latest"
            depends-on "base"
            build context="images" target="runtime" base-arg="PARENT_IMAGE" {
                args {
                    PYTHON_VERSION "3.11"
                }
                arg "DJANGO_SETTINGS" "prod"
            }
        }
    "#;

    let manifest = parse(kdl).unwrap();
    let base = manifest.service("base").unwrap();
    let base_build = base.build.as_ref().unwrap();
    assert_eq!(base_build.context, PathBuf::from("images"));
    assert_eq!(
        base_build.dockerfile,
        Some(PathBuf::from("images/base/Dockerfile"))
    );
    assert_eq!(base_build.base_arg, DEFAULT_BASE_ARG);

    let dashboard = manifest.service("dashboard").unwrap();
    assert_eq!(dashboard.depends_on, vec!["base".to_string()]);
    let build = dashboard.build.as_ref().unwrap();
    assert_eq!(build.target.as_deref(), Some("runtime"));
    assert_eq!(build.base_arg, "PARENT_IMAGE");
    assert_eq!(build.args.get("PYTHON_VERSION").map(String::as_str), Some("3.11"));
    assert_eq!(build.args.get("DJANGO_SETTINGS").map(String::as_str), Some("prod"));
    assert_eq!(build.dockerfile_path(), PathBuf::from("images/Dockerfile"));
}

#[test]
fn test_parse_readiness_signals() {
    let kdl = r#"
        project "demo"
        service "postgres" {
            image "postgres:16"
            ready "data-store" interval=2 timeout=60 {
                command "pg_isready" "-U" "admin"
            }
        }
        service "redis" {
            image "redis:7"
            ready "data-store" command="redis-cli ping"
        }
        service "web" {
            image "demo/web"
            ready "http" url="http://localhost:8000/health" timeout=90
        }
        service "api" {
            image "demo/api"
            ready "process"
        }
    "#;

    let manifest = parse(kdl).unwrap();

    let postgres = &manifest.service("postgres").unwrap().readiness;
    assert_eq!(
        postgres.signal,
        ReadinessSignal::DataStore {
            command: vec!["pg_isready".into(), "-U".into(), "admin".into()]
        }
    );
    assert_eq!(postgres.interval(), Duration::from_secs(2));
    assert_eq!(postgres.timeout(), Duration::from_secs(60));

    let redis = &manifest.service("redis").unwrap().readiness;
    assert_eq!(
        redis.signal,
        ReadinessSignal::DataStore {
            command: vec!["redis-cli".into(), "ping".into()]
        }
    );

    let web = &manifest.service("web").unwrap().readiness;
    assert_eq!(
        web.signal,
        ReadinessSignal::HttpEndpoint {
            url: "http://localhost:8000/health".into()
        }
    );
    assert_eq!(web.timeout(), Duration::from_secs(90));

    let api = &manifest.service("api").unwrap().readiness;
    assert_eq!(api.signal, ReadinessSignal::Process);
}

#[test]
fn test_parse_readiness_errors() {
    let missing_command = r#"
        project "demo"
        service "db" {
            ready "data-store"
        }
    "#;
    assert!(matches!(parse(missing_command), Err(StackError::InvalidConfig(_))));

    let missing_url = r#"
        project "demo"
        service "web" {
            ready "http"
        }
    "#;
    assert!(matches!(parse(missing_url), Err(StackError::InvalidConfig(_))));

    let zero_interval = r#"
        project "demo"
        service "api" {
            ready "process" interval=0
        }
    "#;
    assert!(matches!(parse(zero_interval), Err(StackError::InvalidConfig(_))));

    let unknown = r#"
        project "demo"
        service "api" {
            ready "carrier-pigeon"
        }
    "#;
    assert!(matches!(parse(unknown), Err(StackError::InvalidConfig(_))));
}

#[test]
fn test_parse_ports_and_host_requirements() {
    let kdl = r#"
        project "demo"
        arch "arm64"
        disk min=8 recommended=20
        image-prefix "demo/"
        ports {
            port 80
            port 1812 protocol="udp"
        }
    "#;

    let manifest = parse(kdl).unwrap();
    assert_eq!(manifest.arch.as_deref(), Some("arm64"));
    assert_eq!(manifest.min_disk_gb, 8);
    assert_eq!(manifest.recommended_disk_gb, 20);
    assert_eq!(manifest.image_prefix.as_deref(), Some("demo/"));
    assert_eq!(manifest.ports, vec![HostPort::tcp(80), HostPort::udp(1812)]);
}

#[test]
fn test_parse_rejects_inverted_disk_thresholds() {
    let kdl = r#"
        project "demo"
        disk min=10 recommended=5
    "#;
    assert!(matches!(parse(kdl), Err(StackError::InvalidConfig(_))));
}

#[test]
fn test_parse_rejects_bad_port() {
    let kdl = r#"
        project "demo"
        ports {
            port 70000
        }
    "#;
    assert!(matches!(parse(kdl), Err(StackError::InvalidConfig(_))));
}

#[test]
fn test_parse_rejects_duplicate_service() {
    let kdl = r#"
        project "demo"
        service "api" {}
        service "api" {}
    "#;
    assert!(matches!(parse(kdl), Err(StackError::DuplicateService(name)) if name == "api"));
}

#[test]
fn test_default_manifest_parses() {
    let manifest = default_manifest(PathBuf::from("/opt/stack")).unwrap();
    assert_eq!(manifest.project, "openwisp");
    assert!(manifest.service("base").unwrap().is_buildable());
    assert_eq!(
        manifest.service("dashboard").unwrap().depends_on,
        vec!["base".to_string()]
    );
    assert!(manifest.ports.contains(&HostPort::udp(1812)));
}

#[test]
fn test_parse_manifest_file_uses_parent_as_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.kdl");
    fs::write(&path, "project \"demo\"\n").unwrap();

    let manifest = parse_manifest_file(&path).unwrap();
    assert_eq!(manifest.root, dir.path());
    assert_eq!(manifest.env_path(), dir.path().join(".env"));
}

#[test]
fn test_parse_manifest_file_missing() {
    let dir = tempfile::tempdir().unwrap();
    let result = parse_manifest_file(dir.path().join("nope.kdl"));
    assert!(matches!(result, Err(StackError::ManifestRead { .. })));
}
