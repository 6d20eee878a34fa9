//! Seed data: the built-in item catalog and fallback briefs.
//!
//! These guarantee a match can always be started and graded even without
//! external config or OpenAI.

use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{Brief, BriefSource, CatalogItem, PriorityTier, Requirement, TrapItem};

fn item(id: &str, name: &str, category: &str, monthly_cost: f32) -> CatalogItem {
  CatalogItem { id: id.into(), name: name.into(), category: category.into(), monthly_cost }
}

/// The full item catalog. Brief palettes are strict subsets of this.
pub fn seed_catalog() -> HashMap<String, CatalogItem> {
  let items = vec![
    item("web-lb", "Load Balancer", "networking", 18.0),
    item("ec2-web", "Web Server Fleet", "compute", 64.0),
    item("lambda", "Serverless Functions", "compute", 12.0),
    item("k8s-cluster", "Kubernetes Cluster", "compute", 140.0),
    item("postgres", "PostgreSQL", "database", 55.0),
    item("mysql", "MySQL", "database", 48.0),
    item("graph-db", "Graph Database", "database", 90.0),
    item("redis-cache", "Redis Cache", "caching", 22.0),
    item("memcached", "Memcached", "caching", 16.0),
    item("cdn", "Content Delivery Network", "networking", 25.0),
    item("s3-bucket", "Object Storage", "storage", 8.0),
    item("sqs-queue", "Message Queue", "messaging", 5.0),
    item("kafka", "Event Stream", "messaging", 75.0),
    item("elasticsearch", "Search Cluster", "search", 80.0),
    item("cloudwatch", "Metrics & Alerts", "observability", 10.0),
    item("waf", "Web Application Firewall", "security", 20.0),
    item("vpn-gateway", "VPN Gateway", "security", 30.0),
    item("blockchain-ledger", "Blockchain Ledger", "storage", 250.0),
    item("ml-recommender", "ML Recommendation Engine", "analytics", 190.0),
    item("mainframe", "Mainframe Connector", "compute", 400.0),
  ];
  items.into_iter().map(|i| (i.id.clone(), i)).collect()
}

fn req(id: &str, category: &str, description: &str, tier: PriorityTier, satisfied_by: &[&str]) -> Requirement {
  Requirement {
    id: id.into(),
    category: category.into(),
    description: description.into(),
    tier,
    satisfied_by: satisfied_by.iter().map(|s| s.to_string()).collect(),
  }
}

fn trap(item_id: &str, penalty: f32, rationale: &str) -> TrapItem {
  TrapItem { item_id: item_id.into(), penalty, rationale: rationale.into() }
}

fn ids(v: &[&str]) -> Vec<String> {
  v.iter().map(|s| s.to_string()).collect()
}

/// Built-in briefs served when OpenAI and the TOML bank are both unavailable.
pub fn seed_briefs() -> Vec<Brief> {
  vec![
    Brief {
      scenario_id: "seed-flash-sale".into(),
      source: BriefSource::Seed,
      title: "Flash-Sale Storefront".into(),
      scenario: "A sneaker shop expects a 40x traffic spike for a one-hour drop. \
Orders must never be lost, the catalog must stay fast under read pressure, and \
the team wants to know the moment anything degrades.".into(),
      requirements: vec![
        req("spike", "traffic", "Survive a 40x traffic spike at the edge", PriorityTier::MustHave, &["web-lb", "cdn"]),
        req("orders", "persistence", "Orders are stored transactionally and never lost", PriorityTier::MustHave, &["postgres", "mysql"]),
        req("catalog", "latency", "Catalog reads stay fast under load", PriorityTier::ShouldHave, &["redis-cache", "memcached", "cdn"]),
        req("async", "decoupling", "Order processing is decoupled from checkout", PriorityTier::ShouldHave, &["sqs-queue", "kafka"]),
        req("alerts", "observability", "Degradation is visible within a minute", PriorityTier::NiceToHave, &["cloudwatch"]),
      ],
      palette: ids(&[
        "web-lb", "ec2-web", "postgres", "mysql", "redis-cache", "memcached",
        "cdn", "sqs-queue", "kafka", "cloudwatch", "blockchain-ledger", "ml-recommender",
      ]),
      reference_solution: ids(&["web-lb", "ec2-web", "postgres", "redis-cache", "sqs-queue", "cloudwatch"]),
      alternate_solutions: vec![
        ids(&["web-lb", "ec2-web", "mysql", "memcached", "kafka", "cloudwatch"]),
        ids(&["cdn", "ec2-web", "postgres", "redis-cache", "sqs-queue", "cloudwatch"]),
      ],
      traps: vec![
        trap("blockchain-ledger", 15.0, "An append-only ledger adds cost and latency; orders need a plain transactional store."),
        trap("ml-recommender", 10.0, "Recommendations do nothing for a one-hour sale and burn most of the budget."),
      ],
      time_limit_secs: 90,
      max_score: 100.0,
    },
    Brief {
      scenario_id: "seed-media-pipeline".into(),
      source: BriefSource::Seed,
      title: "Media Upload Pipeline".into(),
      scenario: "A video platform ingests user uploads, transcodes them in the \
background, and serves them globally. Uploads are bursty and originals must \
survive any single failure.".into(),
      requirements: vec![
        req("durable", "storage", "Originals are durably stored", PriorityTier::MustHave, &["s3-bucket"]),
        req("transcode", "compute", "Transcoding runs asynchronously off the upload path", PriorityTier::MustHave, &["lambda", "sqs-queue"]),
        req("delivery", "networking", "Playback is fast worldwide", PriorityTier::ShouldHave, &["cdn"]),
        req("metadata", "search", "Uploads are findable by title and tags", PriorityTier::ShouldHave, &["elasticsearch", "postgres"]),
        req("edge-sec", "security", "The upload endpoint is shielded from abuse", PriorityTier::NiceToHave, &["waf"]),
      ],
      palette: ids(&[
        "s3-bucket", "lambda", "sqs-queue", "cdn", "postgres", "elasticsearch",
        "waf", "k8s-cluster", "kafka", "mainframe", "graph-db", "cloudwatch",
      ]),
      reference_solution: ids(&["s3-bucket", "lambda", "sqs-queue", "cdn", "postgres"]),
      alternate_solutions: vec![
        ids(&["s3-bucket", "k8s-cluster", "kafka", "cdn", "elasticsearch"]),
      ],
      traps: vec![
        trap("mainframe", 15.0, "Nothing here talks to a mainframe; it is the most expensive item on the board."),
        trap("graph-db", 8.0, "Tag lookups are flat queries; a graph store is overkill for this metadata."),
      ],
      time_limit_secs: 120,
      max_score: 100.0,
    },
  ]
}

/// Absolute last-resort brief: a trimmed storefront scenario with a fresh id,
/// used if the seed pool is ever exhausted or filtered out.
pub fn fallback_brief(match_type: &str, time_limit_secs: u32) -> Brief {
  Brief {
    scenario_id: Uuid::new_v4().to_string(),
    source: BriefSource::Seed,
    title: format!("Quick Build ({})", match_type),
    scenario: "Stand up a small web shop: take traffic, store orders, keep reads fast.".into(),
    requirements: vec![
      req("traffic", "traffic", "Accept web traffic behind a single entry point", PriorityTier::MustHave, &["web-lb"]),
      req("store", "persistence", "Persist orders transactionally", PriorityTier::MustHave, &["postgres", "mysql"]),
      req("fast", "latency", "Keep hot reads fast", PriorityTier::ShouldHave, &["redis-cache", "memcached"]),
    ],
    palette: ids(&[
      "web-lb", "ec2-web", "postgres", "mysql", "redis-cache", "memcached",
      "sqs-queue", "cloudwatch", "blockchain-ledger", "ml-recommender",
    ]),
    reference_solution: ids(&["web-lb", "ec2-web", "postgres", "redis-cache"]),
    alternate_solutions: vec![ids(&["web-lb", "ec2-web", "mysql", "memcached"])],
    traps: vec![
      trap("blockchain-ledger", 15.0, "A ledger is the wrong store for mutable order state."),
      trap("ml-recommender", 10.0, "No recommendation surface exists in this scenario."),
    ],
    time_limit_secs,
    max_score: 100.0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn palettes_are_catalog_subsets_within_bounds() {
    let catalog = seed_catalog();
    for brief in seed_briefs() {
      assert!(brief.palette.len() >= 10 && brief.palette.len() <= 20, "{}", brief.scenario_id);
      for id in &brief.palette {
        assert!(catalog.contains_key(id), "unknown palette item {id}");
      }
      for id in &brief.reference_solution {
        assert!(brief.palette.contains(id), "reference item {id} missing from palette");
      }
      for t in &brief.traps {
        assert!(brief.palette.contains(&t.item_id), "trap {} missing from palette", t.item_id);
        assert!(!brief.reference_solution.contains(&t.item_id), "trap {} in reference", t.item_id);
      }
    }
  }
}
