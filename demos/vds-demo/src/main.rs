//! End-to-end walk through a transparency log and a verifiable map
//!
//! Shows:
//! 1. Entries appended to a log
//! 2. Inclusion and consistency proofs checked client-side
//! 3. A tampered audit path is caught
//! 4. Map values (and their absence) proven against a map tree head

mod config;

use anyhow::{Context, Result};
use tracing::info;
use vds::verify::{
    verify_consistency, verify_inclusion, verify_log_entries, verify_map_history, verify_map_value,
    verify_signed_tree_head,
};
use vds::{
    leaf_hash, AllowAllPolicy, InMemoryStorage, LeafRef, LogRef, MapRef, ServiceConfig,
    VerifiableService,
};

use crate::config::AppConfig;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;
    info!(?cfg, "starting demo");

    let mut service_cfg = ServiceConfig { sign_tree_heads: true, ..ServiceConfig::default() };
    if let Some(max) = cfg.max_fetch {
        service_cfg.max_fetch_entries = max;
    }
    let db = VerifiableService::with_policy(InMemoryStorage::new(), AllowAllPolicy, service_cfg);

    println!("Verifiable Data Structures demo");
    println!("===============================\n");

    // 1. Log
    println!("Step 1: append {} entries to log {:?}", cfg.entries, cfg.log_name);
    db.create_log(&cfg.account, &cfg.log_name).context("create log")?;
    let log = LogRef::user(&cfg.account, &cfg.log_name);
    for i in 0..cfg.entries {
        db.add_entry(&log, format!("event #{}", i).as_bytes())?;
    }
    let head = db.tree_hash(&log, 0)?;
    println!("   tree size: {}", head.tree_size);
    println!("   root hash: {}\n", hex::encode(head.root_hash));

    // 2. Proofs
    println!("Step 2: prove and verify");
    let last = head.tree_size - 1;
    let data = format!("event #{}", last);
    let proof = db.inclusion_proof(&log, 0, LeafRef::Hash(leaf_hash(data.as_bytes())))?;
    verify_inclusion(&proof, &leaf_hash(data.as_bytes()), &head).context("inclusion proof")?;
    println!("   inclusion of {:?}: {} hashes, verified", data, proof.audit_path.len());

    if head.tree_size > 1 {
        let older = db.tree_hash(&log, head.tree_size / 2 + head.tree_size % 2)?;
        if older.tree_size < head.tree_size {
            let proof = db.consistency_proof(&log, older.tree_size, head.tree_size)?;
            verify_consistency(&proof, &older, &head).context("consistency proof")?;
            println!(
                "   consistency {} -> {}: {} hashes, verified",
                older.tree_size,
                head.tree_size,
                proof.audit_path.len()
            );
        }
    }

    let mut entries = Vec::new();
    while (entries.len() as i64) < head.tree_size {
        entries.extend(db.fetch_entries(&log, entries.len() as i64, 0)?);
    }
    verify_log_entries(&entries, &head).context("full log audit")?;
    println!("   full audit of {} fetched entries, verified", entries.len());

    let sth = db.signed_tree_hash(&log, 0)?;
    if let Some(vk) = db.verifying_key() {
        verify_signed_tree_head(&sth, &vk).context("signed tree head")?;
        println!("   signed tree head, verified\n");
    }

    // 3. Tampering
    println!("Step 3: server tampers with an audit path");
    let mut forged = proof.clone();
    match forged.audit_path.first_mut() {
        Some(first) => {
            first[0] ^= 0xff;
            match verify_inclusion(&forged, &leaf_hash(data.as_bytes()), &head) {
                Ok(()) => println!("   tampered proof accepted (this should not happen)"),
                Err(e) => println!("   TAMPERING DETECTED: {}", e),
            }
        }
        None => println!("   single-entry log has an empty audit path, nothing to tamper with"),
    }
    println!();

    // 4. Map
    println!("Step 4: verifiable map {:?}", cfg.map_name);
    db.create_map(&cfg.account, &cfg.map_name).context("create map")?;
    let map = MapRef::new(&cfg.account, &cfg.map_name);
    db.map_set_value(&map, b"patient:alice", b"glucose: 95 mg/dL")?;
    db.map_set_value(&map, b"patient:carol", b"glucose: 101 mg/dL")?;
    let map_head = db.map_tree_hash(&map, 0)?;
    println!("   map version: {}", map_head.mutation_log.tree_size);
    println!("   map root:    {}", hex::encode(map_head.root_hash));

    for key in [&b"patient:alice"[..], b"patient:bob"] {
        let proof = db.map_get_value(&map, key, 0)?;
        verify_map_value(&proof, key, &map_head).context("map value proof")?;
        match &proof.value {
            Some(v) => println!(
                "   {} = {:?}, verified",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(v)
            ),
            None => println!("   {} absent, verified", String::from_utf8_lossy(key)),
        }
    }

    let mut lie = db.map_get_value(&map, b"patient:alice", 0)?;
    lie.value = Some(b"glucose: 150 mg/dL".to_vec());
    if verify_map_value(&lie, b"patient:alice", &map_head).is_err() {
        println!("   forged value rejected");
    }

    let mutations = db.fetch_entries(&map.mutation_log(), 0, 0)?;
    let heads = db.fetch_entries(&map.tree_head_log(), 0, 0)?;
    let replayed = verify_map_history(&mutations, &heads).context("map audit")?;
    println!(
        "   replayed {} mutations, every published map root matches",
        replayed.mutation_log.tree_size
    );

    println!("\nDone.");
    Ok(())
}
