#![recursion_limit = "256"]

#[cfg(feature = "ssr")]
#[tokio::main]
async fn main() {
    use axum::routing::get;
    use axum::{Extension, Router};
    use event_vote::app::*;
    use event_vote::changes::{participant_changes, ChangeFeed, PARTICIPANT_CHANGES_PATH};
    use event_vote::config::AppConfig;
    use event_vote::{build_pool, create_schema};
    use leptos::prelude::*;
    use leptos_axum::{generate_route_list, LeptosRoutes};
    use std::net::SocketAddr;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env().expect("Invalid configuration");
    let pool = build_pool(&config).expect("Failed to create pool.");
    {
        let mut conn = pool.get().expect("Failed to get a connection from the pool.");
        create_schema(&mut conn).expect("Failed to create the database schema.");
    }
    let feed = ChangeFeed::new();

    let conf = get_configuration(None).expect("Failed to read the Leptos configuration.");
    let addr = conf.leptos_options.site_addr;
    let leptos_options = conf.leptos_options;
    // Generate the list of routes in your Leptos App
    let routes = generate_route_list(App);

    let leptos_options_clone = leptos_options.clone();
    let context_feed = feed.clone();
    let app = Router::new()
        .route(PARTICIPANT_CHANGES_PATH, get(participant_changes))
        .leptos_routes_with_context(
            &leptos_options,
            routes,
            // Provide pool and change feed for server functions.
            move || {
                provide_context(pool.clone());
                provide_context(context_feed.clone());
            },
            // Use App for main routes.
            move || shell(leptos_options_clone.clone()),
        )
        // Use shell for fallback.
        .fallback(leptos_axum::file_and_error_handler(shell))
        .layer(Extension(feed))
        .with_state(leptos_options.clone());

    tracing::info!(pool_size = config.pool_size, "listening on http://{}", &addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind the listen address.");
    // Connect info is the last resort when telling voters apart.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

#[cfg(not(feature = "ssr"))]
pub fn main() {
    // no client-side main function
    // see lib.rs for hydration function instead
}
