use ledger::Ledger;
use ledger::bet::reserve_stake;
use ledger::round::settle_round;
use ledger::store::MemoryStore;
use ledger::types::{BalanceMode, Currency, ServerId, UserId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const STARTING_POINTS: i64 = 1_000_000_000;

/// Load testing tool for sustained ledger throughput and conservation checks
fn main() {
    println!("=== Ledger Load Testing ===\n");

    test_sustained_increments();
    test_concurrent_opposite_deltas();
    test_concurrent_rounds();
}

fn funded_ledger(users: u64) -> Ledger {
    let ledger = Ledger::new(Arc::new(MemoryStore::new()));
    ledger.register_server(ServerId(1), "load").unwrap();
    for id in 0..users {
        ledger.register_user(UserId(id), None).unwrap();
        ledger
            .adjust_balance(UserId(id), Currency::Points, STARTING_POINTS, BalanceMode::Set)
            .unwrap();
    }
    ledger
}

fn test_sustained_increments() {
    println!("📈 Testing sustained increments...");

    let duration = Duration::from_secs(5);
    let ledger = funded_ledger(1);
    let start = Instant::now();
    let mut operations: i64 = 0;

    while start.elapsed() < duration {
        let delta = if operations % 2 == 0 { 100 } else { -100 };
        ledger
            .adjust_balance(UserId(0), Currency::Points, delta, BalanceMode::Increment)
            .unwrap();
        operations += 1;
    }

    let elapsed = start.elapsed();
    println!("   Operations: {}", operations);
    println!("   Duration: {:.2}s", elapsed.as_secs_f64());
    println!(
        "   Throughput: {:.0} ops/sec\n",
        operations as f64 / elapsed.as_secs_f64()
    );
}

fn test_concurrent_opposite_deltas() {
    println!("⚡ Testing concurrent +X/-X on one account...");

    let ledger = funded_ledger(1);
    let per_thread = 50_000;
    let num_threads = 8;

    let handles: Vec<_> = (0..num_threads)
        .map(|thread_id| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                let delta = if thread_id % 2 == 0 { 37 } else { -37 };
                for _ in 0..per_thread {
                    ledger
                        .adjust_balance(UserId(0), Currency::Points, delta, BalanceMode::Increment)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let balance = ledger.fetch_user(UserId(0)).unwrap().balances.points;
    println!("   Threads: {}", num_threads);
    println!("   Final balance: {} (expected {})", balance, STARTING_POINTS);
    println!(
        "   {}\n",
        if balance == STARTING_POINTS {
            "✅ No lost updates"
        } else {
            "❌ Lost updates detected"
        }
    );
}

fn test_concurrent_rounds() {
    println!("🎲 Testing concurrent rounds across users...");

    let users = 16;
    let ledger = funded_ledger(users);
    let rounds = Arc::new(AtomicU64::new(0));
    let duration = Duration::from_secs(5);

    let handles: Vec<_> = (0..users)
        .map(|id| {
            let ledger = ledger.clone();
            let rounds = Arc::clone(&rounds);
            thread::spawn(move || {
                let start = Instant::now();
                let mut local_rounds = 0;
                while start.elapsed() < duration {
                    let multiplier = [0.0, 1.98, 0.0, 3.0][local_rounds as usize % 4];
                    let receipt = reserve_stake(&ledger, UserId(id), 1_000).unwrap();
                    settle_round(&ledger, Some(ServerId(1)), &receipt, "load", multiplier)
                        .unwrap();
                    local_rounds += 1;
                }
                rounds.fetch_add(local_rounds, Ordering::Relaxed);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total_rounds = rounds.load(Ordering::Relaxed);
    let players: i64 = (0..users)
        .map(|id| ledger.fetch_user(UserId(id)).unwrap().balances.points)
        .sum();
    let house = ledger.fetch_server(ServerId(1)).unwrap().total_profit;

    println!("   Players: {}", users);
    println!("   Rounds: {}", total_rounds);
    println!(
        "   Throughput: {:.0} rounds/sec",
        total_rounds as f64 / duration.as_secs_f64()
    );
    println!(
        "   Conservation: players + house = {} (expected {})\n",
        players + house,
        STARTING_POINTS * users as i64
    );
}
