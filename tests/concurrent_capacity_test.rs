// ==========================================
// 并发容量测试
// ==========================================
// 多个写者竞争同一栏舍/批次；无论如何交错，存栏量不超过 max_capacity，
// 且始终等于该栏舍 Raising 批次的头数合计
// ==========================================


#[cfg(test)]
mod concurrent_capacity_test {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use farm_ledger::domain::{IntakeUpdate, MovementType};
    use farm_ledger::engine::{EngineError, RetryPolicy};

    use crate::test_helpers::{ctx, fast_policy, intake_cmd, movement_cmd, Interleave, TestFarm};

    /// 所列每个栏舍的存栏量等于其 Raising 批次头数
    fn assert_conserved(farm: &TestFarm, barn_ids: &[&str]) {
        for barn_id in barn_ids {
            assert_eq!(
                farm.occupancy(barn_id),
                farm.raising_head(barn_id),
                "barn {} drifted",
                barn_id
            );
        }
    }

    /// 布置一次 `batch_id` 的 10 头出栏，在 `trigger` 处落地
    fn export_ten_at(trigger: &Interleave, farm: &TestFarm, batch_id: &str) {
        let movement = farm.movement.clone();
        let batch_id = batch_id.to_string();
        trigger.arm(move || {
            movement
                .export(&ctx(), &movement_cmd(MovementType::Export, &batch_id, 10))
                .unwrap();
        });
    }

    /// 向 `barn_id` 并发发起 `n` 次 `quantity` 头的进栏
    fn race_intakes(farm: &TestFarm, barn_id: &str, n: usize, quantity: i64) -> Vec<Result<(), EngineError>> {
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let intake = farm.intake.clone();
                let barrier = barrier.clone();
                let barn_id = barn_id.to_string();
                thread::spawn(move || {
                    barrier.wait();
                    intake.create(&ctx(), &intake_cmd(&barn_id, quantity)).map(|_| ())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_concurrent_intakes_admit_exactly_what_fits() {
        let farm = TestFarm::with_policy(fast_policy(50));
        let barn = farm.seed_barn("North", 1000, 0);

        let results = race_intakes(&farm, &barn.barn_id, 10, 150);
        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::CapacityExceeded { .. })))
            .count();

        assert_eq!(admitted, 6, "results: {:?}", results);
        assert_eq!(refused, 4, "results: {:?}", results);
        assert_eq!(farm.occupancy(&barn.barn_id), 900);
        assert_eq!(farm.raising_head(&barn.barn_id), 900);
        assert_eq!(farm.raw.batches.list_all().unwrap().len(), 6);
        assert_eq!(farm.intake.list().unwrap().len(), 6);
    }

    #[test]
    fn test_default_policy_never_oversubscribes() {
        let farm = TestFarm::with_policy(RetryPolicy::default());
        let barn = farm.seed_barn("North", 1000, 0);

        let results = race_intakes(&farm, &barn.barn_id, 10, 150);
        for result in &results {
            match result {
                Ok(())
                | Err(EngineError::CapacityExceeded { .. })
                | Err(EngineError::Busy { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        let admitted = results.iter().filter(|r| r.is_ok()).count() as i64;
        assert!(admitted <= 6);
        let occupancy = farm.occupancy(&barn.barn_id);
        assert_eq!(occupancy, admitted * 150);
        assert!(occupancy <= 1000);
        assert_eq!(farm.raising_head(&barn.barn_id), occupancy);
        assert!(farm.alerts.alerts().is_empty());
    }

    #[test]
    fn test_concurrent_exports_never_oversell() {
        let farm = TestFarm::with_policy(fast_policy(50));
        let barn = farm.seed_barn("North", 1000, 0);
        let batch_id = farm
            .intake
            .create(&ctx(), &intake_cmd(&barn.barn_id, 500))
            .unwrap()
            .batch
            .batch_id;

        let n = 10;
        let barrier = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let movement = farm.movement.clone();
                let barrier = barrier.clone();
                let batch_id = batch_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    movement
                        .export(&ctx(), &movement_cmd(MovementType::Export, &batch_id, 60))
                        .map(|_| ())
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let sold = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::InsufficientHeadCount { .. })))
            .count();
        assert_eq!(sold, 8, "results: {:?}", results);
        assert_eq!(refused, 2, "results: {:?}", results);

        let batch = farm.batch(&batch_id).unwrap();
        assert_eq!(batch.current_head_count, 20);
        assert_eq!(farm.occupancy(&barn.barn_id), 20);
        assert_eq!(farm.movement.list_by_batch(&batch_id).unwrap().len(), 8);
    }

    // ==========================================
    // 转栏与出栏竞争
    // ==========================================

    #[test]
    fn test_transfer_moves_head_left_after_interleaved_export() {
        let (farm, before_update, _) = TestFarm::interleaved(fast_policy(3));
        let north = farm.seed_barn("North", 1000, 200);
        let south = farm.seed_barn("South", 1000, 0);
        let batch_id = farm
            .intake
            .create(&ctx(), &intake_cmd(&north.barn_id, 100))
            .unwrap()
            .batch
            .batch_id;
        assert_eq!(farm.occupancy(&north.barn_id), 300);

        // 出栏在转栏按 100 头规划之后落地
        export_ten_at(&before_update, &farm, &batch_id);
        let moved = farm
            .movement
            .transfer_batch(&ctx(), &batch_id, &south.barn_id)
            .unwrap();
        assert_eq!(moved.barn_id, south.barn_id);
        assert_eq!(moved.current_head_count, 90);

        assert_eq!(farm.occupancy(&north.barn_id), 200);
        assert_eq!(farm.occupancy(&south.barn_id), 90);
        assert_conserved(&farm, &[&north.barn_id, &south.barn_id]);
    }

    #[test]
    fn test_intake_barn_change_moves_head_left_after_interleaved_export() {
        let (farm, before_update, _) = TestFarm::interleaved(fast_policy(3));
        let north = farm.seed_barn("North", 1000, 200);
        let south = farm.seed_barn("South", 1000, 0);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&north.barn_id, 100)).unwrap();

        export_ten_at(&before_update, &farm, &outcome.batch.batch_id);
        let updated = farm
            .intake
            .update(
                &ctx(),
                &outcome.intake_record.intake_id,
                &IntakeUpdate {
                    barn_id: Some(south.barn_id.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.batch.barn_id, south.barn_id);
        assert_eq!(updated.intake_record.quantity, 100);

        assert_eq!(farm.occupancy(&north.barn_id), 200);
        assert_eq!(farm.occupancy(&south.barn_id), 90);
        assert_conserved(&farm, &[&north.barn_id, &south.barn_id]);
    }

    #[test]
    fn test_intake_quantity_and_barn_change_with_interleaved_export() {
        let (farm, before_update, _) = TestFarm::interleaved(fast_policy(3));
        let north = farm.seed_barn("North", 1000, 200);
        let south = farm.seed_barn("South", 1000, 0);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&north.barn_id, 100)).unwrap();

        // 在数量修改前落地，修改随后重读到 90
        export_ten_at(&before_update, &farm, &outcome.batch.batch_id);
        let updated = farm
            .intake
            .update(
                &ctx(),
                &outcome.intake_record.intake_id,
                &IntakeUpdate {
                    quantity: Some(120),
                    barn_id: Some(south.barn_id.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.batch.current_head_count, 110);
        assert_eq!(updated.batch.initial_head_count, 120);

        assert_eq!(farm.occupancy(&north.barn_id), 200);
        assert_eq!(farm.occupancy(&south.barn_id), 110);
        assert_conserved(&farm, &[&north.barn_id, &south.barn_id]);
    }

    #[test]
    fn test_concurrent_transfer_and_exports_conserve_occupancy() {
        let farm = TestFarm::with_policy(fast_policy(50));
        let north = farm.seed_barn("North", 1000, 0);
        let south = farm.seed_barn("South", 1000, 0);
        let batch_id = farm
            .intake
            .create(&ctx(), &intake_cmd(&north.barn_id, 500))
            .unwrap()
            .batch
            .batch_id;

        let n = 6;
        let barrier = Arc::new(Barrier::new(n + 1));
        let exports: Vec<_> = (0..n)
            .map(|_| {
                let movement = farm.movement.clone();
                let barrier = barrier.clone();
                let batch_id = batch_id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    movement
                        .export(&ctx(), &movement_cmd(MovementType::Export, &batch_id, 20))
                        .map(|_| ())
                })
            })
            .collect();
        let transfer = {
            let movement = farm.movement.clone();
            let barrier = barrier.clone();
            let batch_id = batch_id.clone();
            let to = south.barn_id.clone();
            thread::spawn(move || {
                barrier.wait();
                movement.transfer_batch(&ctx(), &batch_id, &to).map(|_| ())
            })
        };

        let export_results: Vec<_> = exports.into_iter().map(|h| h.join().unwrap()).collect();
        let transfer_result = transfer.join().unwrap();

        // 转栏途中重读批次的出栏可能遇到存栏尚未到达的新栏舍，
        // 此时被拒绝并回滚
        for result in &export_results {
            match result {
                Ok(())
                | Err(EngineError::NegativeOccupancy { .. })
                | Err(EngineError::Busy { .. }) => {}
                Err(other) => panic!("unexpected export error: {:?}", other),
            }
        }
        assert!(
            matches!(transfer_result, Ok(()) | Err(EngineError::Busy { .. })),
            "transfer: {:?}",
            transfer_result
        );

        let sold = export_results.iter().filter(|r| r.is_ok()).count() as i64;
        let batch = farm.batch(&batch_id).unwrap();
        assert_eq!(batch.current_head_count, 500 - 20 * sold);
        assert_eq!(
            farm.occupancy(&north.barn_id) + farm.occupancy(&south.barn_id),
            batch.current_head_count
        );
        assert_conserved(&farm, &[&north.barn_id, &south.barn_id]);
        assert!(farm.alerts.alerts().is_empty());
    }
}
