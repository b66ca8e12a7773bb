//! Check command implementation.
//!
//! Validates the configuration and the connectivity to the virtualization host.

use crate::config::{validate_effective_config, Config};
use crate::setup::Host;

/// Validates configuration and host connectivity.
pub async fn command_check(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Herakles QEMU Exporter - System Check");
    println!("=======================================");

    let mut all_ok = true;

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    let host = Host::from_config(config);
    println!("\n🖥️  Checking host connectivity ({})...", host);

    if let Host::Qmp(qmp) = &host {
        if !qmp.socket_dir().is_dir() {
            println!(
                "   ⚠️  Socket directory {} does not exist",
                qmp.socket_dir().display()
            );
        }
    }

    match tokio::time::timeout(config.scrape_timeout(), host.probe()).await {
        Ok(Ok(domains)) => {
            println!("   ✅ Host reachable, {} running domains", domains.len());
            for name in &domains {
                println!("      ├─ {}", name);
            }
        }
        Ok(Err(e)) => {
            println!("   ❌ Host check failed: {}", e);
            all_ok = false;
        }
        Err(_) => {
            println!(
                "   ❌ Host check timed out after {}s",
                config.scrape_timeout().as_secs()
            );
            all_ok = false;
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - exporter is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the output above");
        std::process::exit(1);
    }
}
