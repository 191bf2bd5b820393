use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::thread;

use rust_decimal::Decimal;

use propmarket_core::{AccountId, PropertyId, SystemClock, UserId};
use propmarket_infra::{InMemoryMarketplace, Marketplace, MarketplaceConfig};
use propmarket_payments::PaymentMethod;

fn marketplace() -> Arc<InMemoryMarketplace> {
    Arc::new(Marketplace::in_memory(
        MarketplaceConfig::default(),
        Arc::new(SystemClock),
    ))
}

fn funded(m: &InMemoryMarketplace, credits: u64) -> AccountId {
    m.payments()
        .process(UserId::new(), Decimal::from(credits), PaymentMethod::Mpesa, None)
        .map(|r| r.payment.account_id)
        .expect("funding payment")
}

/// Credit/debit pairs on one account from several threads: every operation
/// contends for the same account lock.
fn bench_single_account(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_single_account");
    let ops_per_thread = 200u64;

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * ops_per_thread * 2));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let m = marketplace();
            let account_id = funded(&m, 10);

            b.iter(|| {
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let m = m.clone();
                        thread::spawn(move || {
                            for _ in 0..ops_per_thread {
                                let _ = black_box(m.ledger().credit(account_id, Decimal::ONE));
                                let _ = black_box(m.ledger().debit(account_id, Decimal::ONE));
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    let _ = worker.join();
                }
            });
        });
    }

    group.finish();
}

/// Same load spread over one account per thread; no lock is shared.
fn bench_disjoint_accounts(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_disjoint_accounts");
    let ops_per_thread = 200u64;

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements(threads as u64 * ops_per_thread * 2));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let m = marketplace();
            let accounts: Vec<AccountId> = (0..threads).map(|_| funded(&m, 10)).collect();

            b.iter(|| {
                let workers: Vec<_> = accounts
                    .iter()
                    .map(|&account_id| {
                        let m = m.clone();
                        thread::spawn(move || {
                            for _ in 0..ops_per_thread {
                                let _ = black_box(m.ledger().credit(account_id, Decimal::ONE));
                                let _ = black_box(m.ledger().debit(account_id, Decimal::ONE));
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    let _ = worker.join();
                }
            });
        });
    }

    group.finish();
}

/// Publication debits the owner and checks the property for an active listing.
fn bench_publish_and_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("listings");

    group.bench_function("publish", |b| {
        let m = marketplace();
        let owner = funded(&m, 1_000_000);
        b.iter(|| {
            let property_id = PropertyId::new();
            m.directory.register(property_id, owner);
            black_box(m.listings().publish(property_id).expect("publish"))
        });
    });

    for listings in [10usize, 100] {
        group.bench_with_input(
            BenchmarkId::new("sweep_nothing_due", listings),
            &listings,
            |b, &listings| {
                let m = marketplace();
                let owner = funded(&m, 50 * listings as u64);
                for _ in 0..listings {
                    let property_id = PropertyId::new();
                    m.directory.register(property_id, owner);
                    m.listings().publish(property_id).expect("publish");
                }
                b.iter(|| black_box(m.listings().expire_sweep(chrono::Utc::now())));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_single_account,
    bench_disjoint_accounts,
    bench_publish_and_sweep
);
criterion_main!(benches);
