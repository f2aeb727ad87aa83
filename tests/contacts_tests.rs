// Contact index tests

mod common;
use common::fixture;

use anyhow::Result;
use serde_json::json;

use msgapp::{ChatError, ContactIndex};

async fn seed_users(fx: &common::Fixture) {
    let users = [
        ("u1", json!({ "username": "Anna", "email": "anna@example.com", "phone": "555-0100" })),
        ("u2", json!({ "username": "Bob", "email": "bob@example.com", "phone": "555-1234" })),
        ("u3", json!({ "username": "Joanne", "phone": "555-2212" })),
        ("u4", json!({ "email": "nameless@example.com" })),
    ];
    for (id, fields) in users {
        fx.backend.seed(&fx.config.users_collection, id, fields).await;
    }
}

fn ids(found: &[&msgapp::Contact]) -> Vec<String> {
    found.iter().map(|c| c.id.clone()).collect()
}

#[tokio::test]
async fn test_refresh_loads_every_user() -> Result<()> {
    let fx = fixture().await;
    seed_users(&fx).await;

    let mut index = ContactIndex::new(fx.feed(), &fx.config);
    assert!(index.is_empty());
    index.refresh().await?;

    assert_eq!(index.len(), 4);
    let nameless = index.get("u4").expect("u4 loaded");
    assert_eq!(nameless.username, "");
    assert_eq!(nameless.phone, None);
    assert_eq!(index.get("u3").and_then(|c| c.email.clone()), None);
    Ok(())
}

#[tokio::test]
async fn test_search_by_username_ignores_case() -> Result<()> {
    let fx = fixture().await;
    seed_users(&fx).await;
    let mut index = ContactIndex::new(fx.feed(), &fx.config);
    index.refresh().await?;

    assert_eq!(ids(&index.search("an")), vec!["u1", "u3"]);
    assert_eq!(ids(&index.search("BOB")), vec!["u2"]);
    assert!(index.search("zed").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_search_by_phone_is_substring() -> Result<()> {
    let fx = fixture().await;
    seed_users(&fx).await;
    let mut index = ContactIndex::new(fx.feed(), &fx.config);
    index.refresh().await?;

    assert_eq!(ids(&index.search("2212")), vec!["u3"]);
    assert_eq!(ids(&index.search("555-")), vec!["u1", "u2", "u3"]);
    Ok(())
}

#[tokio::test]
async fn test_empty_term_returns_whole_snapshot_in_order() -> Result<()> {
    let fx = fixture().await;
    seed_users(&fx).await;
    let mut index = ContactIndex::new(fx.feed(), &fx.config);
    index.refresh().await?;

    let all = index.search("");
    assert_eq!(ids(&all), vec!["u1", "u2", "u3", "u4"]);
    assert_eq!(all.len(), index.contacts().len());
    Ok(())
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_snapshot() -> Result<()> {
    let fx = fixture().await;
    seed_users(&fx).await;
    let mut index = ContactIndex::new(fx.feed(), &fx.config);
    index.refresh().await?;

    fx.backend.set_offline(true);
    let result = index.refresh().await;
    assert!(matches!(result, Err(ChatError::Backend(_))));
    assert_eq!(index.len(), 4);
    Ok(())
}
