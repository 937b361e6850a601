#[tokio::main]
async fn main() -> Result<(), crypto_dashboard_lib::error::AppError> {
    crypto_dashboard_lib::run().await
}
