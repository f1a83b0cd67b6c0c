//! Grants the admin custom claim to the account named by `APP_ADMIN_UID`.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    fitness_studio::claims::run().await
}
