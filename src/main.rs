//! OLDB instance initializer.
//!
//! Creates (or opens) an instance's database and artifact tree and
//! seeds the fixtures a fresh instance needs: the default application
//! settings, the `restricted` tag, and an administrator account.

use oldb::core::types::Role;
use oldb::{logging, Settings, Store};

fn main() -> anyhow::Result<()> {
    logging::init_logging().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let settings = Settings::from_env();
    println!("🚀 Initializing OLD instance '{}'", settings.old_name);
    println!("   database: {}", settings.db_path.display());
    println!("   store:    {}", settings.permanent_store.display());

    let mut store = Store::open(&settings)?;

    if !settings.empty_database {
        let app_settings = store.app_settings()?;
        store.save_app_settings(&app_settings)?;
        store.get_or_create_tag("restricted")?;

        match store.get_user(1) {
            Ok(admin) => println!("✅ Administrator '{}' already present", admin.username),
            Err(_) => {
                let admin = store.create_user("admin", Role::Administrator)?;
                println!("✅ Created administrator '{}'", admin.username);
            }
        }
    }

    println!("✅ Instance ready");
    Ok(())
}
