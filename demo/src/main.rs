use dirs::config_dir;
use log::info;
use std::env;
use tribes_sdk::query::MutationOptions;
use tribes_sdk::{
    Address, ConnectionManager, KeystoreWallet, Network, QueryClient, TribesClient, TribesConfig,
    TribesQueries,
};

async fn log_tribes(queries: &TribesQueries) -> Result<(), Box<dyn std::error::Error>> {
    let tribes = queries.tribes().await?;
    info!("Number of tribes: {}", tribes.len());
    for tribe in &tribes {
        info!("... tribe {}: {} metadata bytes", tribe.id, tribe.metadata.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let factory: Address = env::var("TRIBES_FACTORY")
        .map_err(|_| "Set TRIBES_FACTORY to the factory contract address")?
        .parse()?;

    let network = Network::Testnet.config();
    let mut private_key_path = config_dir().ok_or("Failed to get config directory")?;
    private_key_path.push("tribes/private.key");
    let wallet = KeystoreWallet::load_raw_key(network.rpc_url.clone(), private_key_path)?;
    info!("Wallet account: {}", wallet.address());

    let connection = ConnectionManager::builder().network(network).build();
    connection.connect(&wallet).await;
    let state = connection.state();
    if let Some(err) = state.last_error {
        return Err(err.to_string().into());
    }
    info!(
        "Connected as {} on chain {}",
        state.address.ok_or("No account in session")?,
        state.chain_id.ok_or("No chain in session")?
    );

    let signer = connection
        .connected_provider()
        .ok_or("No authenticated provider")?;
    let tribes = TribesClient::new(
        TribesConfig {
            factory_address: factory,
            tenant: wallet.address(),
        },
        connection.read_only_provider(),
    )
    .with_signer(signer);

    info!("Checking for an existing tenant deployment...");
    let tribes = match tribes.clone().resolve_proxy().await {
        Ok(resolved) => resolved,
        Err(_) => {
            info!("No deployment yet, creating one...");
            tribes.create_instance().await?;
            tribes.resolve_proxy().await?
        }
    };
    info!("Tenant contract: {}", tribes.proxy_address().unwrap());

    let queries = TribesQueries::new(QueryClient::new(), tribes.clone(), Some(wallet.address()));
    log_tribes(&queries).await?;

    if queries.tribes().await?.is_empty() {
        info!("Adding a first tribe...");
        tribes
            .add_tribe(br#"{"name":"Pioneers","description":"The first tribe"}"#.to_vec().into())
            .await?;
    }

    match queries.tribe_id().await? {
        Some(id) if id != 0 => info!("Already a member of tribe {}", id),
        _ => {
            info!("Joining tribe 1...");
            queries.join(1, &MutationOptions::default()).await?;
        }
    }

    let membership = queries.tribe().await?;
    info!("Current membership: {:?}", membership);

    info!("Leaving the tribe again...");
    let options = MutationOptions {
        on_success: Some(Box::new(|hash: &Option<tribes_sdk::TxHash>| {
            info!("Leave transaction: {:?}", hash);
        })),
        on_error: None,
    };
    queries.leave(&options).await?;
    log_tribes(&queries).await?;

    connection.disconnect(&wallet);
    Ok(())
}
