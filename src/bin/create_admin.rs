/// Creates an admin user.
///
/// Usage:
///   cargo run --bin create-admin -- --email admin@example.com --password secret123 [--superuser]
///
/// Environment variables:
///   DATABASE_URL - PostgreSQL connection string
use std::env;
use std::process::ExitCode;

use experiment_service::db::{self, admin_repo};
use experiment_service::security::password;

struct Args {
    email: String,
    password: String,
    superuser: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut email = None;
    let mut password = None;
    let mut superuser = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--email" => email = args.next(),
            "--password" => password = args.next(),
            "--superuser" => superuser = true,
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let email = email.ok_or("--email is required")?;
    if !email.contains('@') {
        return Err("invalid email address".into());
    }
    let password = password.ok_or("--password is required")?;
    if password.len() < 8 {
        return Err("password must be at least 8 characters long".into());
    }

    Ok(Args {
        email,
        password,
        superuser,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("usage: create-admin --email <email> --password <password> [--superuser]");
            return ExitCode::FAILURE;
        }
    };

    dotenvy::dotenv().ok();
    let database_url = match env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("error: DATABASE_URL not set");
            return ExitCode::FAILURE;
        }
    };

    let pool = match db::init_pool(&database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("error: failed to connect to database: {e}");
            return ExitCode::FAILURE;
        }
    };

    match admin_repo::find_by_email(&pool, &args.email).await {
        Ok(Some(_)) => {
            eprintln!("error: user with email {} already exists", args.email);
            return ExitCode::FAILURE;
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    let password_hash = match password::hash_password(&args.password) {
        Ok(hash) => hash,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match admin_repo::insert(&pool, &args.email, &password_hash, args.superuser).await {
        Ok(admin) => {
            println!("created admin user {} ({})", admin.email, admin.id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to create admin user: {e}");
            ExitCode::FAILURE
        }
    }
}
