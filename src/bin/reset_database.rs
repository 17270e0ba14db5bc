#[cfg(feature = "ssr")]
use event_vote::{config::AppConfig, establish_connection, reset_database};

#[cfg(feature = "ssr")]
fn main() {
    let config = AppConfig::from_env().expect("Invalid configuration");
    let mut conn =
        establish_connection(&config.database_url).expect("Failed to connect to the database");
    reset_database(&mut conn).expect("Failed to reset database");
    println!("All votes and participants deleted.");
}

#[cfg(not(feature = "ssr"))]
fn main() {
    println!("This binary requires the 'ssr' feature to be enabled.");
}
