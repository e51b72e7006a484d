//! Integration tests for configuration loading and validation.

use rstest::{fixture, rstest};
use skiff::config::read_file;
use skiff::test_support::EnvGuard;
use skiff::{ConfigError, DigitalOceanConfig, RuntimeConfig, ScalewayConfig};
use tempfile::TempDir;

#[fixture]
fn scaleway() -> ScalewayConfig {
    ScalewayConfig {
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_organization_id: None,
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("Ubuntu 24.04 Noble Numbat"),
        default_architecture: String::from("x86_64"),
    }
}

#[fixture]
fn digitalocean() -> DigitalOceanConfig {
    DigitalOceanConfig {
        api_key: String::from("dop_v1_example"),
        api_url: String::from("https://api.digitalocean.com"),
        region: String::from("nyc3"),
        size: String::from("s-1vcpu-1gb"),
        image: String::from("debian-12-x64"),
        snapshot_name: String::from("SKIFF"),
        key_id: None,
        ssh_public_key_path: Some(String::from("~/.ssh/id_ed25519.pub")),
    }
}

fn missing_field_message(result: Result<(), ConfigError>) -> String {
    match result {
        Err(ConfigError::MissingField(message)) => message,
        other => panic!("expected MissingField, got {other:?}"),
    }
}

#[rstest]
fn complete_configs_validate(scaleway: ScalewayConfig, digitalocean: DigitalOceanConfig) {
    scaleway.validate().expect("scaleway config is complete");
    digitalocean.validate().expect("digitalocean config is complete");
}

#[rstest]
#[case::secret(|cfg: &mut ScalewayConfig| cfg.secret_key.clear(), "SCW_SECRET_KEY", "secret_key")]
#[case::project(
    |cfg: &mut ScalewayConfig| cfg.default_project_id = String::from("  "),
    "SCW_DEFAULT_PROJECT_ID",
    "default_project_id"
)]
#[case::zone(
    |cfg: &mut ScalewayConfig| cfg.default_zone.clear(),
    "SCW_DEFAULT_ZONE",
    "default_zone"
)]
#[case::image(
    |cfg: &mut ScalewayConfig| cfg.default_image.clear(),
    "SCW_DEFAULT_IMAGE",
    "default_image"
)]
fn scaleway_errors_name_env_var_and_toml_key(
    scaleway: ScalewayConfig,
    #[case] clear: fn(&mut ScalewayConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    let mut cfg = scaleway;
    clear(&mut cfg);

    let message = missing_field_message(cfg.validate());
    assert!(message.contains(env_var), "should mention {env_var}: {message}");
    assert!(message.contains(toml_key), "should mention {toml_key}: {message}");
    assert!(message.contains("[scaleway] in skiff.toml"), "{message}");
}

#[rstest]
fn digitalocean_requires_a_token(digitalocean: DigitalOceanConfig) {
    let cfg = DigitalOceanConfig {
        api_key: String::new(),
        ..digitalocean
    };

    let message = missing_field_message(cfg.validate());
    assert!(message.contains("DIGITALOCEAN_API_KEY"), "{message}");
}

#[rstest]
fn digitalocean_requires_some_ssh_key_source(digitalocean: DigitalOceanConfig) {
    let cfg = DigitalOceanConfig {
        ssh_public_key_path: None,
        ..digitalocean
    };

    let message = missing_field_message(cfg.validate());
    assert!(message.contains("DIGITALOCEAN_SSH_PUBLIC_KEY_PATH"), "{message}");
}

#[rstest]
fn digitalocean_key_id_replaces_the_public_key_path(digitalocean: DigitalOceanConfig) {
    let cfg = DigitalOceanConfig {
        key_id: Some(512_190),
        ssh_public_key_path: None,
        ..digitalocean
    };

    cfg.validate().expect("key id is a sufficient key source");
}

#[tokio::test]
async fn runtime_config_reads_environment_overrides() {
    let guard = EnvGuard::set_vars(&[
        ("SKIFF_IMAGE_PREFIX", "team"),
        ("SKIFF_READINESS_ATTEMPTS", "3"),
        ("SKIFF_DOCKER_HOST", "tcp://10.0.0.5:2376"),
    ])
    .await;

    let loaded = RuntimeConfig::load_without_cli_args();
    drop(guard);

    let cfg = loaded.expect("runtime config loads from the environment");
    assert_eq!(cfg.image_prefix, "team");
    assert_eq!(cfg.readiness_attempts, 3);
    assert_eq!(cfg.docker_host.as_deref(), Some("tcp://10.0.0.5:2376"));
    assert_eq!(cfg.connect_timeout_secs, 120);
}

#[test]
fn read_file_returns_contents_and_names_missing_paths() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("payload.txt");
    std::fs::write(&path, "hello\n").expect("write payload");
    let path_str = path.to_str().expect("utf-8 tempdir path");

    assert_eq!(read_file(path_str).expect("readable file"), "hello\n");

    let missing = dir.path().join("absent.txt");
    let err = read_file(missing.to_str().expect("utf-8 path")).expect_err("missing file");
    assert!(
        matches!(err, ConfigError::FileRead { ref path, .. } if path.ends_with("absent.txt")),
        "unexpected error: {err:?}"
    );
}
