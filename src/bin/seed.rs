#![cfg(not(tarpaulin_include))]

use rerc_portal::config::Config;
use rerc_portal::login::{Accounts, Role};
use rerc_portal::store::Database;
use std::env;

/// Create the initial accounts.
///
/// Usage: `seed [admin-password] [reviewer-password]`
///
/// The admin password falls back to `ADMIN_PASSWORD`. A sample `reviewer`
/// account is only created when a reviewer password is given. Existing
/// accounts are left untouched.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let config = Config::load()?;

    let Some(admin_password) = args.get(1).cloned().or(config.admin_password.clone()) else {
        eprintln!("Usage: {} <admin-password> [reviewer-password]", args[0]);
        eprintln!("       (or set ADMIN_PASSWORD)");
        std::process::exit(1);
    };

    let db = Database::open_path(&config.database_path)?;
    let accounts = Accounts::new(db);

    if accounts.ensure_user("admin", &admin_password, Role::Admin)? {
        println!("Created admin user");
    } else {
        println!("Admin user already exists");
    }

    if let Some(reviewer_password) = args.get(2) {
        if accounts.ensure_user("reviewer", reviewer_password, Role::Reviewer)? {
            println!("Created reviewer user");
        } else {
            println!("Reviewer user already exists");
        }
    }

    println!("Database: {}", config.database_path.display());
    Ok(())
}
