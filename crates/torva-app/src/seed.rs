//! Demo-account seeding: an admin and a restricted demo user, created once
//! if absent. Failures are logged, never fatal.

use torva_data::Store;
use tracing::{info, warn};

const ADMIN_EMAIL: &str = "admin@torva.dev";
const ADMIN_PASSWORD: &str = "Admin123";
const DEMO_EMAIL: &str = "demo@torva.dev";
const DEMO_PASSWORD: &str = "Demo1234";

/// Ensure the demo admin and demo user exist.
pub async fn seed_demo_accounts(store: &Store) {
    seed_account(store, ADMIN_EMAIL, ADMIN_PASSWORD, "admin").await;
    seed_account(store, DEMO_EMAIL, DEMO_PASSWORD, "demo").await;
}

async fn seed_account(store: &Store, email: &str, password: &str, role: &str) {
    match store.get_user_by_email(email).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            let hash = match torva_api::auth::hash_password(password) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!(error = %err, email, "failed to hash seed password");
                    return;
                }
            };
            match store.create_user(email, &hash).await {
                Ok(user) => {
                    if let Err(err) = store.update_user_role(user.id, role).await {
                        warn!(error = %err, email, "failed to set seed account role");
                    } else {
                        info!(email, role, "seed account created");
                    }
                }
                Err(err) => warn!(error = %err, email, "failed to create seed account"),
            }
        }
        Err(err) => warn!(error = %err, email, "failed to check for seed account"),
    }
}
