//! Background Script Host behaviour across loads, reloads, and failures,
//! driven through the public API with in-memory capabilities.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rua_host_lib::background::{script_fn, BackgroundContext, BackgroundHost, StaticScriptLoader};
use rua_host_lib::capabilities::MemoryHost;
use rua_host_lib::error::SCRIPT_LOAD_TIMEOUT;
use rua_host_lib::permissions::ExtensionHostInfo;
use rua_host_lib::{ActionRegistry, DynamicAction, RuaError};
use serde_json::json;

fn info(id: &str, permissions: &[&str]) -> ExtensionHostInfo {
    ExtensionHostInfo::new(id, id, "1.0.0").with_permissions(permissions)
}

fn host(loader: StaticScriptLoader, actions: Arc<ActionRegistry>) -> BackgroundHost {
    BackgroundHost::new(Arc::new(loader), Arc::new(MemoryHost::new()), Some(actions))
}

#[tokio::test]
async fn reload_replaces_state_and_ignores_stale_context() {
    let activations = Arc::new(AtomicUsize::new(0));
    let first_ctx: Arc<Mutex<Option<BackgroundContext>>> = Arc::new(Mutex::new(None));

    let loader = StaticScriptLoader::new().register("counter", {
        let activations = activations.clone();
        let first_ctx = first_ctx.clone();
        move || {
            let activations = activations.clone();
            let first_ctx = first_ctx.clone();
            script_fn(move |ctx| {
                let activations = activations.clone();
                let first_ctx = first_ctx.clone();
                async move {
                    ctx.on_activate(move || {
                        let activations = activations.clone();
                        async move {
                            activations.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    });
                    ctx.register_actions(vec![DynamicAction::new("count", "Count")]);
                    first_ctx.lock().unwrap().get_or_insert(ctx);
                    Ok(())
                }
            })
        }
    });
    let actions = Arc::new(ActionRegistry::new());
    let host = host(loader, actions.clone());

    let dir = Path::new("/ext/counter");
    host.execute_background_script(info("counter", &[]), dir, "bg.js").await.unwrap();
    host.execute_background_script(info("counter", &[]), dir, "bg.js").await.unwrap();

    let status = host.status("counter").unwrap();
    assert_eq!(status.activate_callbacks, 1);
    assert_eq!(actions.owned_by("counter"), vec!["counter.count".to_string()]);

    // the first load's context is stale now
    let stale = first_ctx.lock().unwrap().take().unwrap();
    assert!(!stale.is_current());
    let stale_runs = activations.clone();
    stale.on_activate(move || {
        let stale_runs = stale_runs.clone();
        async move {
            stale_runs.fetch_add(100, Ordering::SeqCst);
            Ok(())
        }
    });
    assert!(stale.register_actions(vec![DynamicAction::new("ghost", "Ghost")]).is_empty());

    host.notify_activate().await;
    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert!(actions.get("counter.ghost").is_none());
}

#[tokio::test]
async fn one_failing_callback_does_not_block_the_rest() {
    let reached = Arc::new(AtomicUsize::new(0));
    let loader = StaticScriptLoader::new()
        .register("broken", || {
            script_fn(|ctx| async move {
                ctx.on_activate(|| async { Err(RuaError::ScriptRuntime("boom".into())) });
                Ok(())
            })
        })
        .register("healthy", {
            let reached = reached.clone();
            move || {
                let reached = reached.clone();
                script_fn(move |ctx| {
                    let reached = reached.clone();
                    async move {
                        ctx.on_activate(move || {
                            let reached = reached.clone();
                            async move {
                                reached.fetch_add(1, Ordering::SeqCst);
                                Ok(())
                            }
                        });
                        Ok(())
                    }
                })
            }
        });
    let host = host(loader, Arc::new(ActionRegistry::new()));
    for id in ["broken", "healthy"] {
        host.execute_background_script(info(id, &[]), Path::new("/ext"), "bg.js")
            .await
            .unwrap();
    }

    host.notify_activate().await;
    assert_eq!(reached.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn deactivate_waits_for_slow_callbacks() {
    let done = Arc::new(AtomicUsize::new(0));
    let loader = StaticScriptLoader::new().register("slow", {
        let done = done.clone();
        move || {
            let done = done.clone();
            script_fn(move |ctx| {
                let done = done.clone();
                async move {
                    ctx.on_deactivate(move || {
                        let done = done.clone();
                        async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            done.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    });
                    Ok(())
                }
            })
        }
    });
    let host = host(loader, Arc::new(ActionRegistry::new()));
    host.execute_background_script(info("slow", &[]), Path::new("/ext/slow"), "bg.js")
        .await
        .unwrap();

    host.notify_deactivate().await;
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_load_times_out_and_cleans_up() {
    let loader = StaticScriptLoader::new().register("hang", || {
        script_fn(|ctx| async move {
            ctx.register_actions(vec![DynamicAction::new("early", "Early")]);
            std::future::pending::<()>().await;
            Ok(())
        })
    });
    let actions = Arc::new(ActionRegistry::new());
    let host = host(loader, actions.clone()).with_load_timeout(Duration::from_millis(100));

    let err = host
        .execute_background_script(info("hang", &[]), Path::new("/ext/hang"), "bg.js")
        .await
        .unwrap_err();
    assert!(matches!(err, RuaError::ScriptLoadTimeout));

    let status = host.status("hang").unwrap();
    assert!(!status.loaded);
    assert_eq!(status.error.as_deref(), Some(SCRIPT_LOAD_TIMEOUT));

    host.cleanup_extension("hang");
    host.cleanup_extension("hang");
    assert!(host.status("hang").is_none());
    assert!(actions.is_empty());
}

#[tokio::test]
async fn scripts_are_held_to_their_declared_permissions() {
    let loader = StaticScriptLoader::new().register("clip", || {
        script_fn(|ctx| async move {
            ctx.api().clipboard_write_text("copied").await?;
            match ctx.api().storage_set("k", &json!(1)).await {
                Err(RuaError::PermissionDenied { permission, .. }) if permission == "storage" => Ok(()),
                other => Err(RuaError::ScriptRuntime(format!("expected denial, got {:?}", other))),
            }
        })
    });
    let memory = Arc::new(MemoryHost::new());
    let host = BackgroundHost::new(Arc::new(loader), memory.clone(), None);

    host.execute_background_script(info("clip", &["clipboard"]), Path::new("/ext/clip"), "bg.js")
        .await
        .unwrap();
    assert_eq!(memory.clipboard(), "copied");
}
