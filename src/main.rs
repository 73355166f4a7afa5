#[tokio::main]
async fn main() {
    qrtrack::start_server().await;
}
