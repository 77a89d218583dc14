//! End-to-end tests against a real SSH server and MySQL.
//!
//! The container tests need Docker and are ignored by default:
//!
//! ```bash
//! cargo test --test tunnel -- --ignored
//! ```

use std::net::TcpListener;
use std::time::Duration;

use serde_json::json;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use mysql_tunnel::{
    ConnectionRegistry, DatabaseTarget, MysqlTunnelError, QueryOutcome, SshTunneler,
    TunnelEndpoint, TunneledConnection, Tunneler,
};

const SSH_USER: &str = "tunnel";
const SSH_PASSWORD: &str = "tunnel-pw";
const MYSQL_USER: &str = "app";
const MYSQL_PASSWORD: &str = "app-pw";
const MYSQL_DATABASE: &str = "shop";

struct Stack {
    _mysql: ContainerAsync<GenericImage>,
    _ssh: ContainerAsync<GenericImage>,
    endpoint: TunnelEndpoint,
    target: DatabaseTarget,
}

/// MySQL and an SSH server with TCP forwarding on a shared network.
/// MySQL is only reachable from the SSH container.
async fn start_stack() -> anyhow::Result<Stack> {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let network = format!("mysql-tunnel-it-{}", suffix);
    let mysql_name = format!("mysql-{}", suffix);

    let mysql = GenericImage::new("mysql", "8.0")
        .with_wait_for(WaitFor::message_on_stderr("port: 3306  MySQL Community Server"))
        .with_network(network.clone())
        .with_container_name(mysql_name.clone())
        .with_env_var("MYSQL_ROOT_PASSWORD", "root-pw")
        .with_env_var("MYSQL_USER", MYSQL_USER)
        .with_env_var("MYSQL_PASSWORD", MYSQL_PASSWORD)
        .with_env_var("MYSQL_DATABASE", MYSQL_DATABASE)
        .start()
        .await?;

    let ssh = GenericImage::new("linuxserver/openssh-server", "latest")
        .with_exposed_port(2222.tcp())
        .with_wait_for(WaitFor::message_on_stdout("[ls.io-init] done."))
        .with_network(network)
        .with_env_var("DOCKER_MODS", "linuxserver/mods:openssh-server-ssh-tunnel")
        .with_env_var("PASSWORD_ACCESS", "true")
        .with_env_var("USER_NAME", SSH_USER)
        .with_env_var("USER_PASSWORD", SSH_PASSWORD)
        .start()
        .await?;

    let endpoint = TunnelEndpoint::new(ssh.get_host().await?.to_string(), SSH_USER)
        .with_port(ssh.get_host_port_ipv4(2222.tcp()).await?)
        .with_password(SSH_PASSWORD);
    let target = DatabaseTarget::new(
        mysql_name,
        3306,
        MYSQL_USER,
        MYSQL_PASSWORD,
        MYSQL_DATABASE,
    )?;

    Ok(Stack {
        _mysql: mysql,
        _ssh: ssh,
        endpoint,
        target,
    })
}

#[tokio::test]
async fn missing_fields_are_reported_together() {
    let endpoint = TunnelEndpoint::new("", "deploy");
    let target = DatabaseTarget {
        host: "localhost".to_string(),
        port: 3306,
        username: String::new(),
        password: "pw".to_string(),
        database: String::new(),
    };

    let err = TunneledConnection::new(endpoint, target.clone()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("host"), "{}", message);
    assert!(message.contains("password or private_key_path"), "{}", message);

    let err = TunneledConnection::new(TunnelEndpoint::new("h", "u").with_password("p"), target)
        .unwrap_err()
        .to_string();
    assert!(err.contains("username"), "{}", err);
    assert!(err.contains("database"), "{}", err);
}

#[tokio::test]
async fn execute_before_connect_is_not_connected() {
    let endpoint = TunnelEndpoint::new("bastion.invalid", "deploy").with_password("pw");
    let target = DatabaseTarget::new("localhost", 3306, "app", "pw", "shop").unwrap();
    let mut conn = TunneledConnection::new(endpoint, target).unwrap();

    let result = conn.execute("SELECT 1", &[]).await;
    assert!(matches!(result, Err(MysqlTunnelError::NotConnected)));
    assert!(!conn.is_connected().await);
    conn.close().await;
}

#[tokio::test]
async fn unreachable_ssh_server_fails_to_connect() {
    // Grab a free port, then release it so nothing listens there
    let port = TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|addr| addr.port())
        .unwrap();

    let endpoint = TunnelEndpoint::new("127.0.0.1", "deploy")
        .with_port(port)
        .with_password("pw");
    let tunneler = SshTunneler::new().with_connect_timeout(Duration::from_secs(2));

    let err = tunneler.open(&endpoint, "localhost", 3306).await.unwrap_err();
    assert!(err.is_connect_failure(), "{:?}", err);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn select_and_write_through_tunnel() -> anyhow::Result<()> {
    let stack = start_stack().await?;
    let mut conn = TunneledConnection::new(stack.endpoint.clone(), stack.target.clone())?;
    conn.connect().await?;
    assert!(conn.is_connected().await);

    let one = conn.execute("SELECT 1", &[]).await?;
    assert_eq!(one.rows().map(|r| r.len()), Some(1));

    let created = conn
        .execute(
            "CREATE TABLE items (id INT PRIMARY KEY, name VARCHAR(32), price DECIMAL(8,2))",
            &[],
        )
        .await?;
    assert_eq!(created.affected_rows(), Some(0));

    let inserted = conn
        .execute(
            "INSERT INTO items VALUES (?, ?, ?), (?, ?, ?)",
            &[
                json!(1),
                json!("widget"),
                json!("2.50"),
                json!(2),
                json!("O'Brien; DROP TABLE items"),
                json!("3.00"),
            ],
        )
        .await?;
    assert_eq!(inserted.affected_rows(), Some(2));

    let rows = conn
        .execute("SELECT id, name, price FROM items WHERE id = ?", &[json!(2)])
        .await?;
    let rows = rows.rows().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name"), Some(&json!("O'Brien; DROP TABLE items")));
    assert_eq!(rows[0].get("price"), Some(&json!("3.00")));
    let columns: Vec<&String> = rows[0].keys().collect();
    assert_eq!(columns, ["id", "name", "price"]);

    let tables = conn.execute("SHOW TABLES", &[]).await?;
    assert!(matches!(tables, QueryOutcome::Rows(ref r) if r.len() == 1));

    let updated = conn
        .execute("UPDATE items SET name = 'x' WHERE id = 999", &[])
        .await?;
    assert_eq!(updated.affected_rows(), Some(0));

    conn.close().await;
    assert!(!conn.is_connected().await);
    conn.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn typed_values_match_across_text_and_prepared_results() -> anyhow::Result<()> {
    let stack = start_stack().await?;
    let mut conn = TunneledConnection::new(stack.endpoint.clone(), stack.target.clone())?;
    conn.connect().await?;

    // Zero dates need a permissive sql_mode
    conn.execute("SET SESSION sql_mode = ''", &[]).await?;
    conn.execute("SET SESSION time_zone = '+00:00'", &[]).await?;
    conn.execute(
        "CREATE TABLE typed (\
            id INT PRIMARY KEY, \
            flag BOOLEAN, small TINYINT, big BIGINT, unsigned_int INT UNSIGNED, \
            yr YEAR, f FLOAT, d DOUBLE, amount DECIMAL(8,2), \
            day DATE, zero_day DATE, \
            t TIME, negative_t TIME, max_t TIME, \
            dt DATETIME(6), zero_dt DATETIME, ts TIMESTAMP NULL, \
            doc JSON, raw VARBINARY(4), label VARCHAR(16), missing INT)",
        &[],
    )
    .await?;
    conn.execute(
        "INSERT INTO typed VALUES (1, TRUE, -5, 9007199254740993, 4000000000, \
            2024, 1.1, 2.25, 12.50, \
            '2024-02-29', '0000-00-00', \
            '12:34:56', '-01:00:00', '838:59:59', \
            '2024-02-29 13:45:30.250000', '0000-00-00 00:00:00', '2024-02-29 13:45:30', \
            '{\"a\": [1, 2]}', X'FF00', 'héllo', NULL)",
        &[],
    )
    .await?;

    let expected = json!({
        "id": 1,
        "flag": true,
        "small": -5,
        "big": 9007199254740993_i64,
        "unsigned_int": 4000000000_u64,
        "yr": 2024,
        "f": 1.1,
        "d": 2.25,
        "amount": "12.50",
        "day": "2024-02-29",
        "zero_day": "0000-00-00",
        "t": "12:34:56",
        "negative_t": "-01:00:00",
        "max_t": "838:59:59",
        "dt": "2024-02-29T13:45:30.250",
        "zero_dt": "0000-00-00T00:00:00",
        "ts": "2024-02-29T13:45:30Z",
        "doc": {"a": [1, 2]},
        "raw": "ff00",
        "label": "héllo",
        "missing": null,
    });

    let text = conn.execute("SELECT * FROM typed", &[]).await?;
    let prepared = conn
        .execute("SELECT * FROM typed WHERE id = ?", &[json!(1)])
        .await?;

    let first_row = |outcome: &QueryOutcome| {
        outcome
            .rows()
            .and_then(|rows| rows.first())
            .cloned()
            .map(serde_json::Value::Object)
    };
    assert_eq!(first_row(&text), Some(expected.clone()));
    assert_eq!(first_row(&prepared), Some(expected));

    conn.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn killed_session_is_reopened_on_same_tunnel() -> anyhow::Result<()> {
    let stack = start_stack().await?;
    let mut conn = TunneledConnection::new(stack.endpoint.clone(), stack.target.clone())?;
    conn.connect().await?;
    let port = conn.local_port();

    // Kill our own MySQL session from a second connection
    let mut killer = TunneledConnection::new(stack.endpoint.clone(), stack.target.clone())?;
    killer.connect().await?;
    let id = conn.execute("SELECT CONNECTION_ID() AS id", &[]).await?;
    let id = id
        .rows()
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("id"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| anyhow::anyhow!("no connection id"))?;
    killer.execute(&format!("KILL {}", id), &[]).await?;
    killer.close().await;

    let outcome = conn.execute("SELECT 1", &[]).await?;
    assert_eq!(outcome.row_count(), 1);
    assert_eq!(conn.local_port(), port);

    conn.close().await;
    Ok(())
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn registry_lists_databases_and_evicts_closed() -> anyhow::Result<()> {
    let stack = start_stack().await?;
    let registry: ConnectionRegistry = ConnectionRegistry::new();
    let id = registry
        .open(stack.endpoint.clone(), stack.target.clone())
        .await?;

    let databases = registry.execute(&id, "SHOW DATABASES", &[]).await?;
    let names: Vec<_> = databases
        .rows()
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row.get("Database"))
        .collect();
    assert!(names.contains(&&json!(MYSQL_DATABASE)));

    let status = registry.status(&id).await.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert!(status.connected);
    assert_eq!(status.mysql_database, MYSQL_DATABASE);

    assert!(registry.evict_dead().await.is_empty());
    assert!(registry.disconnect(&id).await);
    assert!(registry.is_empty().await);
    Ok(())
}
