// ==========================================
// 补偿测试
// ==========================================
// 首次写入之后的失败: 竞争落败、重试耗尽、超时以及回滚失败
// ==========================================


#[cfg(test)]
mod compensation_test {
    use std::sync::Arc;
    use std::time::Duration;

    use farm_ledger::domain::{
        BarnStatus, BatchStatus, IntakeRecord, IntakeUpdate, MovementStatus, MovementType,
    };
    use farm_ledger::engine::{ConsistencyAudit, EngineError, ErrorKind, Violation};
    use farm_ledger::repository::{IntakeStore, RepositoryError, RepositoryResult};

    use crate::test_helpers::{
        ctx, fast_policy, intake_cmd, movement_cmd, ContendedBarnStore, FlakyBatchStore,
        RacingBarnStore, StatusFlipBarnStore, TestFarm,
    };

    /// 带版本校验的更新总是落败的进栏仓储
    struct StaleIntakeStore {
        inner: Arc<dyn IntakeStore>,
    }

    impl IntakeStore for StaleIntakeStore {
        fn insert(&self, record: &IntakeRecord) -> RepositoryResult<()> {
            self.inner.insert(record)
        }

        fn find_by_id(&self, intake_id: &str) -> RepositoryResult<Option<IntakeRecord>> {
            self.inner.find_by_id(intake_id)
        }

        fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Option<IntakeRecord>> {
            self.inner.find_by_batch(batch_id)
        }

        fn list_all(&self) -> RepositoryResult<Vec<IntakeRecord>> {
            self.inner.list_all()
        }

        fn update(&self, record: &IntakeRecord) -> RepositoryResult<IntakeRecord> {
            Err(RepositoryError::lock_failure(
                "IntakeRecord",
                &record.intake_id,
                record.revision,
                record.revision + 1,
            ))
        }

        fn delete(&self, intake_id: &str) -> RepositoryResult<bool> {
            self.inner.delete(intake_id)
        }
    }

    fn reconcile(farm: &TestFarm) -> Vec<Violation> {
        ConsistencyAudit::new(
            farm.raw.barns.clone(),
            farm.raw.batches.clone(),
            farm.raw.intakes.clone(),
        )
        .run()
        .unwrap()
        .violations
    }

    // ==========================================
    // 重试耗尽
    // ==========================================

    #[test]
    fn test_always_contended_barn_rolls_back_batch() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(ContendedBarnStore::always(barns)))
        });
        let barn = farm.seed_barn("North", 1000, 0);

        let err = farm.intake.create(&ctx(), &intake_cmd(&barn.barn_id, 100)).unwrap_err();
        match err {
            EngineError::Busy { ref entity, attempts, .. } => {
                assert_eq!(entity, "Barn");
                assert_eq!(attempts, 3);
            }
            ref other => panic!("expected Busy, got {:?}", other),
        }
        assert_eq!(err.kind().status_hint(), 503);
        assert!(err.is_retryable());

        assert!(farm.raw.batches.list_all().unwrap().is_empty());
        assert!(farm.raw.intakes.list_all().unwrap().is_empty());
        assert_eq!(farm.occupancy(&barn.barn_id), 0);
        assert!(farm.alerts.alerts().is_empty());
        assert!(reconcile(&farm).is_empty());
    }

    #[test]
    fn test_transient_contention_is_absorbed_by_retry() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(ContendedBarnStore::times(barns, 2)))
        });
        let barn = farm.seed_barn("North", 1000, 0);

        let outcome = farm.intake.create(&ctx(), &intake_cmd(&barn.barn_id, 100)).unwrap();
        assert_eq!(outcome.batch.current_head_count, 100);
        assert_eq!(farm.occupancy(&barn.barn_id), 100);
    }

    // ==========================================
    // 目标栏舍竞争落败
    // ==========================================

    #[test]
    fn test_barn_move_losing_race_restores_source_barn() {
        let farm = TestFarm::build(fast_policy(5), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(RacingBarnStore::new(barns, "barn-b", 700, 800)))
        });
        let north = farm.seed_barn("North", 1000, 0);
        farm.insert_barn("barn-b", 1000, 700);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&north.barn_id, 250)).unwrap();

        // 预检时 700 + 250 未超限，随后竞争写者将 B 推到 800
        let err = farm
            .intake
            .update(
                &ctx(),
                &outcome.intake_record.intake_id,
                &IntakeUpdate {
                    barn_id: Some("barn-b".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        match err {
            EngineError::CapacityExceeded {
                ref barn_id,
                current_occupancy,
                ..
            } => {
                assert_eq!(barn_id, "barn-b");
                assert_eq!(current_occupancy, 800);
            }
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }

        assert_eq!(farm.occupancy(&north.barn_id), 250);
        assert_eq!(farm.occupancy("barn-b"), 800);
        let batch = farm.batch(&outcome.batch.batch_id).unwrap();
        assert_eq!(batch.barn_id, north.barn_id);
        assert_eq!(batch.current_head_count, 250);
        let record = farm.intake.get(&outcome.intake_record.intake_id).unwrap();
        assert_eq!(record.barn_id, north.barn_id);
        assert_eq!(record.revision, 0);
        assert!(farm.alerts.alerts().is_empty());
    }

    #[test]
    fn test_barn_move_into_full_barn_fails_before_writes() {
        let farm = TestFarm::new();
        let north = farm.seed_barn("North", 1000, 0);
        farm.insert_barn("barn-b", 1000, 800);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&north.barn_id, 250)).unwrap();

        let err = farm
            .intake
            .update(
                &ctx(),
                &outcome.intake_record.intake_id,
                &IntakeUpdate {
                    barn_id: Some("barn-b".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded { .. }));
        assert_eq!(farm.occupancy(&north.barn_id), 250);
        assert_eq!(farm.occupancy("barn-b"), 800);
        assert_eq!(farm.batch(&outcome.batch.batch_id).unwrap().barn_id, north.barn_id);
    }

    #[test]
    fn test_lost_intake_revision_unwinds_counts() {
        let farm = TestFarm::build(fast_policy(3), |mut repos| {
            repos.intakes = Arc::new(StaleIntakeStore {
                inner: repos.intakes.clone(),
            });
            repos
        });
        let barn = farm.seed_barn("North", 500, 0);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&barn.barn_id, 100)).unwrap();

        let err = farm
            .intake
            .update(
                &ctx(),
                &outcome.intake_record.intake_id,
                &IntakeUpdate {
                    quantity: Some(150),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(err.is_concurrent_modification());
        assert_eq!(err.kind(), ErrorKind::Conflict);

        assert_eq!(farm.occupancy(&barn.barn_id), 100);
        let batch = farm.batch(&outcome.batch.batch_id).unwrap();
        assert_eq!(batch.current_head_count, 100);
        assert_eq!(batch.initial_head_count, 100);
    }

    // ==========================================
    // 截止时间
    // ==========================================

    #[test]
    fn test_deadline_expiry_rolls_back_created_batch() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let batches = repos.batches.clone();
            repos.with_batches(Arc::new(FlakyBatchStore::slow_insert(
                batches,
                Duration::from_millis(100),
            )))
        });
        let barn = farm.seed_barn("North", 1000, 0);

        let request = ctx().with_timeout(Duration::from_millis(20));
        let err = farm.intake.create(&request, &intake_cmd(&barn.barn_id, 100)).unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
        assert_eq!(err.kind().status_hint(), 504);

        assert!(farm.raw.batches.list_all().unwrap().is_empty());
        assert!(farm.raw.intakes.list_all().unwrap().is_empty());
        assert_eq!(farm.occupancy(&barn.barn_id), 0);
    }

    // ==========================================
    // 补偿失败
    // ==========================================

    #[test]
    fn test_failed_rollback_raises_alert_and_shows_in_reconciliation() {
        let farm = TestFarm::build(fast_policy(2), |repos| {
            let barns = repos.barns.clone();
            let batches = repos.batches.clone();
            repos
                .with_barns(Arc::new(ContendedBarnStore::always(barns)))
                .with_batches(Arc::new(FlakyBatchStore::failing_delete(batches)))
        });
        let barn = farm.seed_barn("North", 1000, 0);

        let err = farm.intake.create(&ctx(), &intake_cmd(&barn.barn_id, 100)).unwrap_err();
        match err {
            EngineError::PartialFailure {
                ref operation,
                ref failed_compensations,
                ..
            } => {
                assert_eq!(operation, "intake.create");
                assert_eq!(failed_compensations.len(), 1);
                assert!(failed_compensations[0].starts_with("create_batch"));
            }
            ref other => panic!("expected PartialFailure, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::PartialFailure);

        let alerts = farm.alerts.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].operation, "intake.create");
        assert_eq!(alerts[0].actor, "tester");

        // 孤立批次可被对账发现
        let batches = farm.raw.batches.list_all().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].status, BatchStatus::Raising);
        let violations = reconcile(&farm);
        assert!(violations.contains(&Violation::OccupancyDrift {
            barn_id: barn.barn_id.clone(),
            recorded: 0,
            expected: 100,
        }));
    }

    #[test]
    fn test_barn_closed_for_maintenance_mid_write_refuses_intake() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(StatusFlipBarnStore::new(
                barns,
                "barn-m",
                BarnStatus::Maintenance,
            )))
        });
        farm.insert_barn("barn-m", 1000, 0);

        // 预检时栏舍为 Empty，写入前状态已变更
        let err = farm.intake.create(&ctx(), &intake_cmd("barn-m", 100)).unwrap_err();
        assert!(matches!(err, EngineError::BarnUnavailable { .. }), "got {:?}", err);

        let barn = farm.barn("barn-m");
        assert_eq!(barn.status, BarnStatus::Maintenance);
        assert_eq!(barn.current_occupancy, 0);
        assert!(farm.raw.batches.list_all().unwrap().is_empty());
        assert!(farm.alerts.alerts().is_empty());
    }

    // ==========================================
    // 出入栏与删除回滚
    // ==========================================

    #[test]
    fn test_full_export_unwinds_when_barn_stays_contended() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(ContendedBarnStore::always_after(barns, 1)))
        });
        let barn = farm.seed_barn("North", 1000, 0);
        let batch_id = farm
            .intake
            .create(&ctx(), &intake_cmd(&barn.barn_id, 500))
            .unwrap()
            .batch
            .batch_id;

        let err = farm
            .movement
            .export(&ctx(), &movement_cmd(MovementType::Export, &batch_id, 500))
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy { .. }), "got {:?}", err);

        let batch = farm.batch(&batch_id).unwrap();
        assert_eq!(batch.current_head_count, 500);
        assert_eq!(batch.status, BatchStatus::Raising);
        assert_eq!(farm.occupancy(&barn.barn_id), 500);
        assert!(farm.movement.list_by_batch(&batch_id).unwrap().is_empty());
        assert!(farm.alerts.alerts().is_empty());
        assert!(reconcile(&farm).is_empty());
    }

    #[test]
    fn test_complete_losing_to_cancel_unwinds_counts() {
        let (farm, _, before_head_cas) = TestFarm::interleaved(fast_policy(3));
        let barn = farm.seed_barn("North", 1000, 0);
        let batch_id = farm
            .intake
            .create(&ctx(), &intake_cmd(&barn.barn_id, 300))
            .unwrap()
            .batch
            .batch_id;
        let pending = farm
            .movement
            .submit_pending(&ctx(), &movement_cmd(MovementType::Export, &batch_id, 120))
            .unwrap();

        let movement = farm.movement.clone();
        let movement_id = pending.movement_id.clone();
        before_head_cas.arm(move || {
            movement.cancel(&ctx(), &movement_id).unwrap();
        });

        let err = farm.movement.complete(&ctx(), &pending.movement_id).unwrap_err();
        assert!(err.is_concurrent_modification(), "got {:?}", err);

        let record = farm.movement.get(&pending.movement_id).unwrap();
        assert_eq!(record.status, MovementStatus::Cancelled);
        assert_eq!(record.resulting_head_count, None);
        assert_eq!(farm.batch(&batch_id).unwrap().current_head_count, 300);
        assert_eq!(farm.occupancy(&barn.barn_id), 300);
        assert!(farm.alerts.alerts().is_empty());
    }

    #[test]
    fn test_intake_delete_reopens_batch_when_release_fails() {
        let farm = TestFarm::build(fast_policy(3), |repos| {
            let barns = repos.barns.clone();
            repos.with_barns(Arc::new(ContendedBarnStore::always_after(barns, 1)))
        });
        let barn = farm.seed_barn("North", 1000, 0);
        let outcome = farm.intake.create(&ctx(), &intake_cmd(&barn.barn_id, 200)).unwrap();
        let intake_id = outcome.intake_record.intake_id.clone();

        let err = farm.intake.delete(&ctx(), &intake_id).unwrap_err();
        assert!(matches!(err, EngineError::Busy { .. }), "got {:?}", err);

        let batch = farm.batch(&outcome.batch.batch_id).unwrap();
        assert_eq!(batch.status, BatchStatus::Raising);
        assert_eq!(batch.current_head_count, 200);
        assert_eq!(farm.occupancy(&barn.barn_id), 200);
        assert!(farm.intake.get(&intake_id).is_ok());
        assert!(farm.alerts.alerts().is_empty());
        assert!(reconcile(&farm).is_empty());
    }
}
