//! Load testing for the gateway.

use std::time::{Duration, Instant};
use service_gateway::config::Strategy;
use service_gateway::http::X_PROXY_INSTANCE;

mod common;

use common::{base_config, service, start_backend, start_gateway, TestGateway};

#[tokio::test]
async fn test_load_performance() {
    let backends = vec![
        start_backend("a", 200).await,
        start_backend("b", 200).await,
        start_backend("c", 200).await,
    ];
    let instances = backends.iter().map(|b| b.instance()).collect();
    let gw = start_gateway(base_config(vec![service("web", Strategy::LeastConnections, instances)])).await;

    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = TestGateway::client();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = format!("{}/web/", gw.url);
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }
    let duration = start.elapsed();

    assert_eq!(all_latencies.len(), total_requests, "every request succeeds");
    assert_eq!(backends.iter().map(|b| b.hits()).sum::<usize>(), total_requests);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", total_requests as f64 / duration.as_secs_f64());
    println!("P50 Latency:    {:?}", p50);
    println!("P99 Latency:    {:?}", p99);
    println!("-------------------------\n");

    // Every connection slot is released once the load stops
    let stats = gw.gateway.service_stats("web").unwrap();
    assert!(stats.instances.iter().all(|i| i.active_connections == 0));
}

#[tokio::test]
async fn test_round_robin_distribution() {
    let backends = vec![
        start_backend("a", 200).await,
        start_backend("b", 200).await,
        start_backend("c", 200).await,
    ];
    let instances = backends.iter().map(|b| b.instance()).collect();
    let gw = start_gateway(base_config(vec![service("web", Strategy::RoundRobin, instances)])).await;
    let client = TestGateway::client();

    let mut order = Vec::new();
    for _ in 0..30 {
        let res = client.get(format!("{}/web/", gw.url)).send().await.unwrap();
        order.push(res.headers()[X_PROXY_INSTANCE].to_str().unwrap().to_string());
    }

    assert_eq!(&order[..3], &["a", "b", "c"]);
    for b in &backends {
        assert_eq!(b.hits(), 10, "backend {} got an even share", b.name);
    }
}

#[tokio::test]
async fn test_least_connections_avoids_slow_instance() {
    let slow = start_backend("a-slow", 200).await;
    let fast = start_backend("b-fast", 200).await;
    slow.set_delay(Duration::from_millis(400));

    let gw = start_gateway(base_config(vec![service(
        "web",
        Strategy::LeastConnections,
        vec![slow.instance(), fast.instance()],
    )]))
    .await;
    let client = TestGateway::client();

    // Occupy the slow instance, then send a burst while it is busy
    let pinned = {
        let client = client.clone();
        let url = format!("{}/web/", gw.url);
        tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(slow.hits(), 1);

    for _ in 0..10 {
        let res = client.get(format!("{}/web/", gw.url)).send().await.unwrap();
        assert_eq!(res.headers()[X_PROXY_INSTANCE], "b-fast");
    }

    assert_eq!(pinned.await.unwrap(), 200);
    assert_eq!(slow.hits(), 1);
}
