use std::sync::Arc;

use fleet_model::{CasePolicy, MissionId, NewEvent, Priority, SortieId, SpecialistId, StreamType};
use fleet_projections::Ledger;
use fleet_store::Store;
use serde_json::json;

async fn fresh_ledger() -> (tempfile::TempDir, Ledger) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::bootstrap(&dir.path().join("state.db"), CasePolicy::Sensitive)
        .await
        .unwrap();
    (dir, Ledger::new(Arc::new(store)))
}

#[tokio::test]
async fn mission_created_projects_a_pending_mission_row() {
    let (_dir, ledger) = fresh_ledger().await;
    let mission_id = MissionId::generate();

    ledger
        .append(NewEvent::new(
            "mission_created",
            StreamType::Mission,
            mission_id.as_str(),
            json!({"title": "Ship v2", "description": null, "priority": "high", "metadata": {}}),
        ))
        .await
        .unwrap();

    let mission = fleet_projections::queries::get_mission(ledger.store().pool(), &mission_id)
        .await
        .unwrap()
        .expect("mission row must exist");
    assert_eq!(mission.title, "Ship v2");
    assert_eq!(mission.priority, Priority::High);
    assert_eq!(mission.total_sorties, 0);
}

#[tokio::test]
async fn sortie_created_bumps_mission_total_sorties() {
    let (_dir, ledger) = fresh_ledger().await;
    let mission_id = MissionId::generate();
    let sortie_id = SortieId::generate();

    ledger
        .append(NewEvent::new(
            "mission_created",
            StreamType::Mission,
            mission_id.as_str(),
            json!({"title": "Ship v2", "priority": "medium", "metadata": {}}),
        ))
        .await
        .unwrap();

    ledger
        .append(NewEvent::new(
            "sortie_created",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({
                "mission_id": mission_id.as_str(),
                "title": "Write the parser",
                "priority": "medium",
                "files": ["src/parser.rs"],
                "metadata": {},
            }),
        ))
        .await
        .unwrap();

    let mission = fleet_projections::queries::get_mission(ledger.store().pool(), &mission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(mission.total_sorties, 1);

    let sortie = fleet_projections::queries::get_sortie(ledger.store().pool(), &sortie_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sortie.mission_id, Some(mission_id));
    assert_eq!(sortie.files, vec!["src/parser.rs".to_string()]);
}

#[tokio::test]
async fn sortie_assignment_also_marks_the_specialist_busy() {
    let (_dir, ledger) = fresh_ledger().await;
    let sortie_id = SortieId::generate();
    let specialist_id = SpecialistId::generate();

    ledger
        .append(NewEvent::new(
            "specialist_registered",
            StreamType::Specialist,
            specialist_id.as_str(),
            json!({"name": "drone-7", "capabilities": ["rust"]}),
        ))
        .await
        .unwrap();

    ledger
        .append(NewEvent::new(
            "sortie_created",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"title": "Fix bug", "priority": "low", "files": [], "metadata": {}}),
        ))
        .await
        .unwrap();

    ledger
        .append(NewEvent::new(
            "sortie_assigned",
            StreamType::Sortie,
            sortie_id.as_str(),
            json!({"specialist_id": specialist_id.as_str()}),
        ))
        .await
        .unwrap();

    let sortie = fleet_projections::queries::get_sortie(ledger.store().pool(), &sortie_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sortie.assigned_to, Some(specialist_id.clone()));

    let specialist = fleet_projections::queries::get_specialist(ledger.store().pool(), &specialist_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(specialist.current_sortie, Some(sortie_id));
}

#[tokio::test]
async fn unknown_event_type_is_ignored_not_fatal() {
    let (_dir, ledger) = fresh_ledger().await;
    let mission_id = MissionId::generate();

    let result = ledger
        .append(NewEvent::new(
            "mission_archived_to_cold_storage",
            StreamType::Mission,
            mission_id.as_str(),
            json!({}),
        ))
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn rebuild_from_empty_reconstructs_projections_from_the_event_log() {
    let (_dir, ledger) = fresh_ledger().await;
    let mission_id = MissionId::generate();

    ledger
        .append(NewEvent::new(
            "mission_created",
            StreamType::Mission,
            mission_id.as_str(),
            json!({"title": "Rebuild me", "priority": "low", "metadata": {}}),
        ))
        .await
        .unwrap();

    // Simulate a stale projection: wipe the row and the version marker, and
    // rebuild from the event log.
    let mut write = ledger.store().begin_write().await.unwrap();
    sqlx::query("DELETE FROM missions").execute(&mut *write.tx).await.unwrap();
    sqlx::query("DELETE FROM projection_meta").execute(&mut *write.tx).await.unwrap();
    write.commit().await.unwrap();
    ledger.store().note_write_committed();

    fleet_projections::rebuild_if_needed(ledger.store()).await.unwrap();

    let mission = fleet_projections::queries::get_mission(ledger.store().pool(), &mission_id)
        .await
        .unwrap()
        .expect("mission must be reconstructed by replay");
    assert_eq!(mission.title, "Rebuild me");
}
