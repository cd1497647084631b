// benches/benchmarks.rs — Performance benchmarks (criterion)
//
// Hot paths on every research iteration:
//   1. Tolerant decoding of model answers (fenced / prose-wrapped JSON)
//   2. Post-search hook chain over large tool payloads
//   3. Pre-message context chain and relevance selection over long histories

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};

use delve::agents::optimizer::{to_entries, RelevanceOptimizer};
use delve::core::decode::decode;
use delve::core::types::{Finding, SearchResult};
use delve::hooks::{HookContext, HookEvent, HookPipeline};
use delve::infra::config::{ContextConfig, HooksConfig};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn verifier_answer() -> String {
    format!(
        "Sure, here is the evaluation you asked for.\n```json\n{}\n```\nLet me know if you need more.",
        json!({
            "coverage_score": 0.7, "depth_score": 0.6,
            "source_quality_score": 0.8, "consistency_score": 0.9,
            "gaps": ["pricing", "regional data"],
            "recommended_angles": ["pricing models", "EU adoption"],
            "strengths": ["primary sources"],
            "decision": "continue",
            "reasoning": "coverage is uneven",
        })
    )
}

fn search_payload(n: usize) -> Value {
    let results: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "url": format!("https://site{}.example/article", i % (n / 2).max(1)),
                "key_points": ["point one", "point two", "point three"],
                "relevance": 0.7,
                "content": "lorem ipsum dolor sit amet ".repeat(200),
            })
        })
        .collect();
    json!({ "results": results })
}

fn findings(angles: usize, searches: usize) -> Vec<Finding> {
    (0..angles)
        .map(|a| Finding {
            angle: format!("angle {}", a),
            searches: (0..searches)
                .map(|s| SearchResult {
                    query: format!("query {} {}", a, s),
                    provider: "tavily".into(),
                    key_points: vec![format!("fact {} {}", a, s); 4],
                    source_url: format!("https://source{}.example", (a * searches + s) % 40),
                    relevance: 0.6,
                    raw_size: 5000,
                    compressed_size: 800,
                })
                .collect(),
            summary: "A paragraph of synthesis for this angle. ".repeat(10),
            token_total: 800 * searches,
        })
        .collect()
}

// ─── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let text = verifier_answer();
    c.bench_function("decode_fenced_verifier_answer", |b| {
        b.iter(|| decode::<Value>(black_box(&text)))
    });
}

fn bench_post_search(c: &mut Criterion) {
    let pipeline = HookPipeline::standard(&HooksConfig::default(), &ContextConfig::default());
    let payload = search_payload(20);
    c.bench_function("post_search_chain_20_results", |b| {
        b.iter(|| {
            let mut ctx = HookContext::for_tool(HookEvent::PostSearch, "search_tavily");
            pipeline.execute(HookEvent::PostSearch, black_box(payload.clone()), &mut ctx)
        })
    });
}

fn bench_context(c: &mut Criterion) {
    let hooks = Arc::new(HookPipeline::standard(
        &HooksConfig::default(),
        &ContextConfig::default(),
    ));
    let entries = Value::Array(to_entries(&findings(25, 5)));

    c.bench_function("pre_message_chain_150_entries", |b| {
        b.iter(|| {
            let mut ctx = HookContext::new(HookEvent::PreMessage);
            hooks.execute(HookEvent::PreMessage, black_box(entries.clone()), &mut ctx)
        })
    });

    let optimizer = RelevanceOptimizer::new(hooks.clone(), 6, 8_000);
    let list = match &entries {
        Value::Array(list) => list.clone(),
        _ => Vec::new(),
    };
    c.bench_function("relevance_select_150_entries", |b| {
        b.iter(|| optimizer.select(black_box(list.clone())))
    });
}

criterion_group!(benches, bench_decode, bench_post_search, bench_context);
criterion_main!(benches);
