use std::sync::Arc;

use labelplus_config::{ConfigDocument, LabelOptions, PathMode};
use labelplus_core::{AutolabelScope, CoreError, CoreResult, CoreState, ID_NONE, ID_NULL};
use labelplus_telemetry::Metrics;
use labelplus_test_support::FakeHost;
use labelplus_test_support::fixtures::{downloading, torrent};
use labelplus_torrent_core::TorrentId;

fn engine(host: &Arc<FakeHost>) -> CoreState {
    CoreState::new(
        ConfigDocument::default(),
        host.clone(),
        Metrics::new().expect("metrics registry"),
    )
}

fn update_options(
    state: &mut CoreState,
    id: &str,
    edit: impl FnOnce(&mut LabelOptions),
) -> CoreResult<()> {
    let mut options = state.label_options(id)?.clone();
    edit(&mut options);
    state.set_label_options(id, options, None)
}

fn tid(id: &str) -> TorrentId {
    TorrentId::from(id)
}

#[test]
fn sibling_names_must_be_unique() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    let mut state = engine(&host);
    let movies = state.add_label(ID_NULL, "Movies")?;
    let tv = state.add_label(ID_NULL, "TV")?;
    assert_eq!((movies.as_str(), tv.as_str()), ("0", "1"));

    assert!(matches!(
        state.add_label(ID_NULL, "Movies"),
        Err(CoreError::LabelExists { .. })
    ));
    state.add_label(&tv, "Movies")?;
    assert!(matches!(
        state.rename_label(&tv, "Movies"),
        Err(CoreError::LabelExists { .. })
    ));
    state.rename_label(&tv, "TV")?;
    assert!(matches!(
        state.add_label(ID_NULL, "  "),
        Err(CoreError::EmptyLabel)
    ));
    assert!(matches!(
        state.add_label(ID_NULL, "a/b"),
        Err(CoreError::InvalidCharacters { .. })
    ));
    assert!(matches!(
        state.add_label("9", "Orphan"),
        Err(CoreError::InvalidParent { .. })
    ));
    Ok(())
}

#[test]
fn lowest_unused_id_is_reused() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    let mut state = engine(&host);
    let first = state.add_label(ID_NULL, "A")?;
    state.add_label(ID_NULL, "B")?;
    state.remove_label(&first)?;
    assert_eq!(state.add_label(ID_NULL, "C")?, first);
    Ok(())
}

#[test]
fn moving_into_own_subtree_is_rejected() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", torrent("a"));
    let mut state = engine(&host);
    let parent = state.add_label(ID_NULL, "Parent")?;
    let child = state.add_label(&parent, "Child")?;
    let grandchild = state.add_label(&child, "Grandchild")?;
    state.set_torrent_labels(&grandchild, &[tid("a")])?;
    let before = state.document();

    for dest in [&parent, &child, &grandchild] {
        assert!(matches!(
            state.move_label(&parent, dest, "Parent"),
            Err(CoreError::InvalidParent { .. })
        ));
    }
    assert!(matches!(
        state.move_label("42", ID_NULL, "Nope"),
        Err(CoreError::InvalidLabel { .. })
    ));
    assert_eq!(state.label_count(), 3);
    assert_eq!(state.document(), before);
    assert_eq!(state.children(&parent), [child.clone()]);
    assert_eq!(state.children(&child), [grandchild.clone()]);
    assert_eq!(state.label_name(&parent), Some("Parent"));
    assert_eq!(state.label_torrents(&grandchild), [tid("a")]);
    let labels = state.torrent_labels(&[tid("a")]);
    assert_eq!(
        labels.get(&tid("a")),
        Some(&(grandchild.clone(), "Parent/Child/Grandchild".to_string()))
    );
    Ok(())
}

#[test]
fn moved_subtrees_are_rekeyed_with_their_torrents() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", torrent("a"));
    host.add_torrent("b", torrent("b"));
    let mut state = engine(&host);
    let movies = state.add_label(ID_NULL, "Movies")?;
    let hd = state.add_label(&movies, "HD")?;
    let video = state.add_label(ID_NULL, "Video")?;
    state.set_torrent_labels(&movies, &[tid("a")])?;
    state.set_torrent_labels(&hd, &[tid("b")])?;

    let moved = state.move_label(&movies, &video, "Films")?;
    assert_eq!(moved, "1:0");
    assert!(!state.contains_label(&movies));
    assert!(!state.contains_label(&hd));
    assert_eq!(state.torrent_label(&tid("a")), "1:0");
    assert_eq!(state.torrent_label(&tid("b")), "1:0:0");
    assert_eq!(state.full_name("1:0:0"), "Video/Films/HD");
    assert_eq!(state.children(&video), ["1:0".to_string()]);
    assert_eq!(state.descendent_labels(&video, -1), ["1:0", "1:0:0"]);
    assert_eq!(state.descendent_labels(&video, 1), ["1:0"]);
    assert_eq!(state.sorted_labels(), ["1:0:0", "1:0", "1"]);
    Ok(())
}

#[test]
fn moving_within_the_same_parent_is_a_rename() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    let mut state = engine(&host);
    let books = state.add_label(ID_NULL, "Books")?;
    assert_eq!(state.move_label(&books, ID_NULL, "Ebooks")?, books);
    assert_eq!(state.full_name(&books), "Ebooks");
    Ok(())
}

#[test]
fn path_changes_cascade_through_derived_labels_only() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("show", torrent("show"));
    let mut state = engine(&host);
    let media = state.add_label(ID_NULL, "Media")?;
    update_options(&mut state, &media, |options| {
        options.move_completed_path = "/done/media".into();
    })?;
    let tv = state.add_label(&media, "TV")?;
    update_options(&mut state, &tv, |options| {
        options.move_completed_mode = PathMode::Subfolder;
    })?;
    let shows = state.add_label(&tv, "Shows")?;
    update_options(&mut state, &shows, |options| {
        options.move_completed_mode = PathMode::Parent;
        options.download_settings = true;
        options.move_completed = true;
    })?;
    let fixed = state.add_label(&media, "Fixed")?;
    update_options(&mut state, &fixed, |options| {
        options.move_completed_path = "/elsewhere".into();
    })?;
    state.set_torrent_labels(&shows, &[tid("show")])?;

    let path = |state: &CoreState, id: &str| -> String {
        state
            .label_options(id)
            .map(|options| options.move_completed_path.clone())
            .unwrap_or_default()
    };
    assert_eq!(path(&state, &tv), "/done/media/TV");
    assert_eq!(path(&state, &shows), "/done/media/TV");

    state.rename_label(&tv, "Series")?;
    assert_eq!(path(&state, &tv), "/done/media/Series");
    assert_eq!(path(&state, &shows), "/done/media/Series");
    assert_eq!(path(&state, &fixed), "/elsewhere");
    assert_eq!(
        host.settings("show").move_completed_path.as_deref(),
        Some("/done/media/Series")
    );

    update_options(&mut state, &media, |options| {
        options.move_completed_path = "/archive".into();
    })?;
    assert_eq!(path(&state, &shows), "/archive/Series");
    assert_eq!(path(&state, &fixed), "/elsewhere");
    assert_eq!(
        state.parent_path(&shows, labelplus_config::PathKind::MoveCompleted)?,
        "/archive/Series"
    );
    Ok(())
}

#[test]
fn storage_follows_label_changes_when_enabled() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("iso", torrent("iso"));
    let mut state = engine(&host);
    let mut prefs = state.preferences().clone();
    prefs.options.move_on_changes = true;
    state.set_preferences(prefs);

    let linux = state.add_label(ID_NULL, "Linux")?;
    update_options(&mut state, &linux, |options| {
        options.download_settings = true;
        options.download_location = true;
        options.download_location_path = "/data/linux".into();
    })?;
    state.set_torrent_labels(&linux, &[tid("iso")])?;
    assert_eq!(host.moves(), [(tid("iso"), "/data/linux".to_string())]);

    update_options(&mut state, &linux, |options| {
        options.download_location_path = "/data/distros".into();
    })?;
    assert_eq!(host.moves().last(), Some(&(tid("iso"), "/data/distros".to_string())));
    assert_eq!(state.metrics().snapshot().storage_moves_total, 2);

    host.clear_history();
    state.remove_label(&linux)?;
    assert!(host.moves().is_empty());
    assert_eq!(state.torrent_label(&tid("iso")), ID_NONE);
    Ok(())
}

#[test]
fn finished_torrents_move_only_when_rechecks_trigger_moves() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("t", torrent("t"));
    let mut state = engine(&host);
    let done = state.add_label(ID_NULL, "Done")?;
    update_options(&mut state, &done, |options| {
        options.download_settings = true;
        options.move_completed = true;
        options.move_completed_path = "/done".into();
    })?;
    state.set_torrent_labels(&done, &[tid("t")])?;
    host.set_finished("t", true);

    state.on_torrent_finished(&tid("t"));
    assert!(host.moves().is_empty());

    let mut prefs = state.preferences().clone();
    prefs.options.move_after_recheck = true;
    state.set_preferences(prefs);
    state.on_torrent_finished(&tid("t"));
    assert_eq!(host.moves(), [(tid("t"), "/done".to_string())]);
    Ok(())
}

#[test]
fn unlabeling_resets_host_defaults_unless_disabled() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", torrent("a"));
    host.add_torrent("b", torrent("b"));
    let mut state = engine(&host);
    let capped = state.add_label(ID_NULL, "Capped")?;
    update_options(&mut state, &capped, |options| {
        options.bandwidth_settings = true;
        options.max_connections = 10;
    })?;
    state.set_torrent_labels(&capped, &[tid("a"), tid("b")])?;
    assert_eq!(host.settings("a").max_connections, Some(10));

    state.set_torrent_labels(ID_NONE, &[tid("a")])?;
    assert_eq!(host.settings("a").max_connections, Some(-1));

    let mut prefs = state.preferences().clone();
    prefs.options.reset_on_label_unset = false;
    state.set_preferences(prefs);
    state.set_torrent_labels(ID_NONE, &[tid("b")])?;
    assert_eq!(host.settings("b").max_connections, Some(10));
    Ok(())
}

#[test]
fn autolabel_rerun_respects_scope() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("free", torrent("debian.iso"));
    host.add_torrent("taken", torrent("debian-live.iso"));
    let mut state = engine(&host);
    let other = state.add_label(ID_NULL, "Other")?;
    let debian = state.add_label(ID_NULL, "Debian")?;
    state.set_torrent_labels(&other, &[tid("taken")])?;

    let mut options = state.label_options(&debian)?.clone();
    options.autolabel_settings = true;
    options.autolabel_rules = vec![labelplus_config::Rule::new(
        labelplus_config::RuleProperty::Name,
        labelplus_config::RuleOperator::StartsWith,
        labelplus_config::CaseSensitivity::MatchCase,
        "debian",
    )];
    state.set_label_options(&debian, options.clone(), Some(AutolabelScope::Unlabeled))?;
    assert_eq!(state.torrent_label(&tid("free")), debian);
    assert_eq!(state.torrent_label(&tid("taken")), other);

    state.set_label_options(&debian, options, Some(AutolabelScope::All))?;
    assert_eq!(state.torrent_label(&tid("taken")), debian);
    Ok(())
}

#[test]
fn shared_limits_are_redistributed_per_cycle() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("fast", downloading("fast", 80.0));
    host.add_torrent("slow", downloading("slow", 40.0));
    host.add_torrent("idle", torrent("idle"));
    let mut state = engine(&host);
    let pool = state.add_label(ID_NULL, "Pool")?;
    update_options(&mut state, &pool, |options| {
        options.bandwidth_settings = true;
        options.shared_limit = true;
        options.max_download_speed = 100.0;
    })?;
    state.set_torrent_labels(&pool, &[tid("fast"), tid("slow"), tid("idle")])?;
    assert!(state.shared_limit_labels().contains(&pool));

    assert_eq!(state.update_shared_limits(), 2);
    let fast = host.settings("fast").max_download_speed.unwrap_or_default();
    let slow = host.settings("slow").max_download_speed.unwrap_or_default();
    assert!((fast - 66.67).abs() < 0.01);
    assert!((slow - 33.33).abs() < 0.01);
    assert_eq!(host.settings("fast").max_upload_speed, Some(-1.0));

    update_options(&mut state, &pool, |options| options.shared_limit = false)?;
    assert!(state.shared_limit_labels().is_empty());
    assert_eq!(state.update_shared_limits(), 0);
    assert_eq!(state.metrics().snapshot().shared_limit_cycles_total, 2);
    Ok(())
}

#[test]
fn document_reloads_into_an_equivalent_state() -> CoreResult<()> {
    let host = Arc::new(FakeHost::new());
    host.add_torrent("a", torrent("a"));
    let mut state = engine(&host);
    let parent = state.add_label(ID_NULL, "Parent")?;
    let child = state.add_label(&parent, "Child")?;
    state.set_torrent_labels(&child, &[tid("a")])?;

    let document = state.document();
    let mut reloaded = CoreState::new(
        document.clone(),
        host.clone(),
        Metrics::new().expect("metrics registry"),
    );
    assert_eq!(reloaded.document(), document);
    assert_eq!(reloaded.full_name(&child), "Parent/Child");
    assert_eq!(reloaded.torrent_label(&tid("a")), child);
    Ok(())
}
