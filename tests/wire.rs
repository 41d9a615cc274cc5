use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use tablecap::tenant::TenantManager;
use tablecap::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("tablecap_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, Duration::from_secs(20)));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "tablecap".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

async fn connect_as(addr: SocketAddr, dbname: &str, password: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(dbname)
        .user("staff")
        .password(password);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, dbname: &str) -> Client {
    connect_as(addr, dbname, "tablecap").await.unwrap()
}

async fn select(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn sqlstate(err: &tokio_postgres::Error) -> &str {
    err.as_db_error().map(|e| e.code().code()).unwrap_or("")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_password_is_refused() {
    let (addr, _tm) = start_test_server().await;
    assert!(connect_as(addr, "trattoria", "guess").await.is_err());
}

#[tokio::test]
async fn booking_fills_a_slot() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;

    client
        .batch_execute(
            r#"INSERT INTO opening_hours (date, hours) VALUES ('2026-10-24', '["13:30","14:00","14:30","15:00","15:30"]')"#,
        )
        .await
        .unwrap();
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO bookings (id, date, time, party_size) VALUES ('{id}', '2026-10-24', '14:30', 9)"
        ))
        .await
        .unwrap();

    let rows = select(&client, "SELECT * FROM slots WHERE date = '2026-10-24'").await;
    assert_eq!(rows.len(), 5);
    let full = rows.iter().find(|r| r.get("time") == Some("14:30")).unwrap();
    assert_eq!(full.get("status"), Some("full"));
    assert_eq!(full.get("remaining"), Some("0"));
    assert_eq!(full.get("total"), Some("9"));

    let bookings = select(&client, "SELECT * FROM bookings WHERE date = '2026-10-24'").await;
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].get("id"), Some(id.to_string().as_str()));
    assert_eq!(bookings[0].get("status"), Some("confirmed"));

    let open = select(
        &client,
        "SELECT * FROM available_slots WHERE date = '2026-10-24' AND party_size = 2",
    )
    .await;
    assert_eq!(open.len(), 4);
}

#[tokio::test]
async fn day_override_flips_status() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;

    let rows = select(&client, "SELECT * FROM day_status WHERE date = '2026-10-20'").await;
    assert_eq!(rows[0].get("weekday"), Some("Martes"));
    assert_eq!(rows[0].get("is_open"), Some("f"));
    assert_eq!(rows[0].get("explicit_override"), None);

    client
        .batch_execute("INSERT INTO day_overrides (date, is_open) VALUES ('2026-10-20', true)")
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM day_status WHERE date = '2026-10-20'").await;
    assert_eq!(rows[0].get("is_open"), Some("t"));
    assert_eq!(rows[0].get("explicit_override"), Some("t"));

    client
        .batch_execute("DELETE FROM day_overrides WHERE date = '2026-10-20'")
        .await
        .unwrap();
    let rows = select(&client, "SELECT * FROM day_status WHERE date = '2026-10-20'").await;
    assert_eq!(rows[0].get("is_open"), Some("f"));
}

#[tokio::test]
async fn holiday_is_reported_by_reason_code() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;

    let rows = select(
        &client,
        "SELECT * FROM date_feasibility WHERE date = '2026-12-25' AND party_size = 2",
    )
    .await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("feasible"), Some("f"));
    assert_eq!(rows[0].get("reason"), Some("special_holiday"));
}

#[tokio::test]
async fn party_of_nine_is_rejected_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;
    let id = Ulid::new();

    let rows = select(
        &client,
        &format!(
            "SELECT * FROM party_size_change WHERE date = '2026-10-24' \
             AND current_party_size = 4 AND new_party_size = 9 AND booking_id = '{id}'"
        ),
    )
    .await;
    assert_eq!(rows[0].get("accepted"), Some("f"));
    assert_eq!(rows[0].get("reason"), Some("party_too_large"));
    assert_eq!(rows[0].get("people_difference"), Some("5"));
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;

    let err = client
        .batch_execute(
            r#"INSERT INTO hour_allocations (date, percentages) VALUES ('2026-10-24', '{"13:30":60,"14:00":30}')"#,
        )
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0001");

    let err = client
        .simple_query("SELECT * FROM slots")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42601");

    let err = client
        .simple_query("SELECT * FROM reservations_archive WHERE date = '2026-10-24'")
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "42601");

    let err = client
        .batch_execute(&format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new()))
        .await
        .unwrap_err();
    assert_eq!(sqlstate(&err), "P0001");
}

#[tokio::test]
async fn tenants_are_isolated_by_database() {
    let (addr, _tm) = start_test_server().await;
    let a = connect(addr, "north").await;
    let b = connect(addr, "south").await;

    a.batch_execute("INSERT INTO daily_limits (date, daily_limit) VALUES ('2026-10-24', 12)")
        .await
        .unwrap();

    let north = select(&a, "SELECT * FROM month_grid WHERE year = 2026 AND month = 10").await;
    let south = select(&b, "SELECT * FROM month_grid WHERE year = 2026 AND month = 10").await;
    assert_eq!(north.len(), 31);
    assert_eq!(north[23].get("daily_limit"), Some("12"));
    assert_eq!(south[23].get("daily_limit"), Some("45"));
}

#[tokio::test]
async fn extended_protocol_binds_text_parameters() {
    let (addr, _tm) = start_test_server().await;
    let client = connect(addr, "trattoria").await;

    let rows = client
        .query("SELECT * FROM day_status WHERE date = $1", &[&"2026-10-24"])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let weekday: &str = rows[0].get("weekday");
    assert_eq!(weekday, "Sábado");
}
