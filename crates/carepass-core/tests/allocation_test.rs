// Copyright (C) 2025 Carepass contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for coupon allocation under concurrency, exhaustion and release.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use carepass_core::allocator::{CouponAllocator, DEFAULT_START_OFFSET};
use carepass_core::persistence::{ReservationLedger, ReservationStatus};
use carepass_core::pool::PoolRegistry;
use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reservations_never_share_a_coupon() {
    let (_dir, store) = file_store().await;
    let allocator = CouponAllocator::with_start_offset(store.clone(), registry(SOURCE, 10), 0);

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let allocator = allocator.clone();
            tokio::spawn(async move {
                allocator
                    .reserve(SOURCE, &format!("order-{i}"), RECIPIENT)
                    .await
            })
        })
        .collect();

    let mut granted = Vec::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            Some(record) => granted.push(record.coupon_number),
            None => empty += 1,
        }
    }

    assert_eq!(granted.len(), 10, "every coupon handed out exactly once");
    assert_eq!(empty, 30);

    let distinct: HashSet<_> = granted.iter().copied().collect();
    assert_eq!(distinct.len(), granted.len(), "duplicate coupon granted");

    let rows = store.list_reservations(SOURCE).await.unwrap();
    assert_eq!(rows.len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_across_allocators() {
    // Two connection pools on one database file behave like two server processes.
    let (dir, store_a) = file_store().await;
    let store_b = open_file_store(&dir).await;
    let pools = registry(SOURCE, 6);
    let a = CouponAllocator::with_start_offset(store_a.clone(), pools.clone(), 0);
    let b = CouponAllocator::with_start_offset(store_b, pools, 0);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let allocator = if i % 2 == 0 { a.clone() } else { b.clone() };
            tokio::spawn(async move {
                allocator
                    .reserve(SOURCE, &format!("order-{i}"), RECIPIENT)
                    .await
            })
        })
        .collect();

    let mut numbers = Vec::new();
    for handle in handles {
        if let Some(record) = handle.await.unwrap().unwrap() {
            numbers.push(record.coupon_number);
        }
    }

    assert_eq!(numbers.len(), 6);
    assert_eq!(numbers.iter().collect::<HashSet<_>>().len(), 6);
    assert_eq!(store_a.list_reservations(SOURCE).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_exhaustion_is_deterministic() {
    let store = sqlite_store().await;
    let allocator = CouponAllocator::with_start_offset(store, registry(SOURCE, 3), 0);

    for i in 0..3 {
        assert!(
            allocator
                .reserve(SOURCE, &format!("order-{i}"), RECIPIENT)
                .await
                .unwrap()
                .is_some()
        );
    }

    for _ in 0..3 {
        let result = allocator.reserve(SOURCE, "late", RECIPIENT).await.unwrap();
        assert!(result.is_none(), "exhausted pool must keep returning none");
    }
}

#[tokio::test]
async fn test_default_offset_skips_first_forty_nine() {
    let store = sqlite_store().await;
    let allocator = CouponAllocator::new(store, registry(SOURCE, 52));

    let mut code_ids = Vec::new();
    while let Some(r) = allocator.reserve(SOURCE, "order", RECIPIENT).await.unwrap() {
        code_ids.push(r.code_id);
    }

    assert_eq!(DEFAULT_START_OFFSET, 49);
    assert_eq!(code_ids, vec![50, 51, 52]);
}

#[tokio::test]
async fn test_release_makes_coupon_reusable() {
    let store = sqlite_store().await;
    let allocator = CouponAllocator::with_start_offset(store.clone(), registry(SOURCE, 1), 0);

    let first = allocator
        .reserve(SOURCE, "order-1", RECIPIENT)
        .await
        .unwrap()
        .unwrap();
    assert!(allocator.reserve(SOURCE, "order-2", RECIPIENT).await.unwrap().is_none());

    assert!(allocator.release(&first.id).await.unwrap());
    assert!(store.get_reservation(&first.id).await.unwrap().is_none());

    let second = allocator
        .reserve(SOURCE, "order-2", RECIPIENT)
        .await
        .unwrap()
        .expect("released coupon is free again");
    assert_eq!(second.coupon_number, first.coupon_number);
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn test_sent_coupon_is_never_reissued() {
    let store = sqlite_store().await;
    let allocator = CouponAllocator::with_start_offset(store.clone(), registry(SOURCE, 1), 0);

    let r = allocator
        .reserve(SOURCE, "order-1", RECIPIENT)
        .await
        .unwrap()
        .unwrap();
    allocator.mark_sent(&r.id).await.unwrap();

    assert!(allocator.release(&r.id).await.is_err());
    assert!(allocator.reserve(SOURCE, "order-2", RECIPIENT).await.unwrap().is_none());

    let stored = store.get_reservation(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), ReservationStatus::Sent);
    assert!(stored.sent_at.is_some());
}

#[tokio::test]
async fn test_pools_are_independent() {
    let store = sqlite_store().await;
    let pools = Arc::new(PoolRegistry::from_pools([
        pool("thyrocare", 1),
        pool("redcliffe", 1),
    ]));
    let allocator = CouponAllocator::with_start_offset(store, pools, 0);

    let a = allocator.reserve("thyrocare", "o1", RECIPIENT).await.unwrap().unwrap();
    let b = allocator.reserve("redcliffe", "o2", RECIPIENT).await.unwrap().unwrap();

    // Same coupon number in different sources does not collide.
    assert_eq!(a.coupon_number, b.coupon_number);
    assert_eq!(a.source_id, "thyrocare");
    assert_eq!(b.source_id, "redcliffe");
}
