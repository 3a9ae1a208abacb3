use chrono::{Duration, Utc};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, StoreConfig};
use crate::errors::{Result, SyncError};
use crate::models::{Viewer, ViewerRole};
use crate::runtime::SessionOptions;
use crate::storage::register::{get_document_store_plugin, register_builtin_plugins};
use crate::storage::{DocumentStore, LiveQueryProvider, MemoryStorage};

const DEMO_TEACHER: &str = "demo-teacher";
const DEMO_STUDENT: &str = "demo-student";

pub struct StartupContext {
    pub viewer: Viewer,
    pub provider: Arc<dyn LiveQueryProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub options: SessionOptions,
}

/// 创建已读状态使用的文档存储
async fn create_document_store(store_config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    let store_type = &store_config.store_type;

    warn!("Attempting to create {} document store", store_type);

    if let Some(constructor) = get_document_store_plugin(store_type) {
        match constructor(store_config.clone()).await {
            Ok(store) => {
                warn!("Successfully created {} document store", store_type);
                return Ok(store);
            }
            Err(e) => {
                warn!("Failed to create {} document store: {}", store_type, e);
            }
        }
    } else {
        warn!("Document store '{}' not found in registry", store_type);
    }

    // 配置的后端不可用时回退到内存存储
    if store_type != "memory" {
        warn!("Falling back to memory document store");
        if let Some(fallback_constructor) = get_document_store_plugin("memory") {
            match fallback_constructor(store_config.clone()).await {
                Ok(store) => {
                    warn!("Successfully created fallback memory document store");
                    return Ok(store);
                }
                Err(fallback_e) => {
                    warn!("Failed to create fallback memory store: {}", fallback_e);
                }
            }
        }
    }

    Err(SyncError::store_plugin_not_found(format!(
        "No document store available (tried: {store_type})"
    )))
}

/// 根据会话配置确定查看者
fn resolve_viewer(config: &AppConfig) -> Result<Viewer> {
    let role: ViewerRole = config
        .session
        .viewer_role
        .parse()
        .map_err(SyncError::configuration)?;

    let id = if config.session.viewer_id.is_empty() {
        if !config.app.seed_demo {
            return Err(SyncError::configuration(
                "session.viewer_id is required when demo data is disabled",
            ));
        }
        match role {
            ViewerRole::Teacher => DEMO_TEACHER.to_string(),
            ViewerRole::Student => DEMO_STUDENT.to_string(),
        }
    } else {
        config.session.viewer_id.clone()
    };

    Ok(Viewer { id, role })
}

/// 生成班级加入码
fn generate_join_code(length: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// 写入一个小型演示班级，包含查看者本人
fn seed_demo(storage: &MemoryStorage, viewer: &Viewer) {
    let now = Utc::now();
    let (teacher, student) = match viewer.role {
        ViewerRole::Teacher => (viewer.id.as_str(), DEMO_STUDENT),
        ViewerRole::Student => (DEMO_TEACHER, viewer.id.as_str()),
    };

    storage.upsert(
        "classes",
        "demo-class",
        json!({
            "name": "Demo Physics",
            "teacherId": teacher,
            "studentIds": [student, "demo-peer-1", "demo-peer-2"],
            "joinCode": generate_join_code(6),
        }),
    );

    let assignments = [
        ("demo-kinematics", "Kinematics worksheet", -2, 30),
        ("demo-forces", "Forces lab report", -10, -6),
        ("demo-energy", "Energy quiz", -1, 96),
    ];
    for (id, title, created_days, due_hours) in assignments {
        storage.upsert(
            "assignments",
            id,
            json!({
                "classId": "demo-class",
                "title": title,
                "createdAt": (now + Duration::days(created_days)).to_rfc3339(),
                "dueAt": (now + Duration::hours(due_hours)).to_rfc3339(),
                "totalPoints": 100,
                "status": "published",
            }),
        );
    }

    storage.upsert(
        "submissions",
        "demo-submission-1",
        json!({
            "assignmentId": "demo-forces",
            "studentId": student,
            "submittedAt": (now - Duration::days(7)).to_rfc3339(),
            "grade": 84,
            "gradedAt": (now - Duration::days(1)).to_rfc3339(),
        }),
    );
    storage.upsert(
        "submissions",
        "demo-submission-2",
        json!({
            "assignmentId": "demo-forces",
            "studentId": "demo-peer-1",
            "submittedAt": (now - Duration::days(6)).to_rfc3339(),
        }),
    );
    storage.upsert(
        "announcements",
        "demo-welcome",
        json!({
            "classId": "demo-class",
            "title": "Welcome",
            "body": "Lab sessions start next week. Bring your safety goggles and a calculator.",
            "createdAt": (now - Duration::hours(3)).to_rfc3339(),
            "pinned": true,
        }),
    );
    storage.add(
        "chatMessages",
        json!({
            "classId": "demo-class",
            "authorId": "demo-peer-2",
            "authorName": "Peer Two",
            "authorRole": "student",
            "createdAt": (now - Duration::hours(1)).to_rfc3339(),
            "text": "Does anyone have the notes from Monday?",
        }),
    );
    storage.upsert(
        "materials",
        "demo-slides",
        json!({
            "classId": "demo-class",
            "title": "Week 3 slides",
            "createdAt": (now - Duration::days(2)).to_rfc3339(),
        }),
    );

    info!("Demo data seeded for {} {}", viewer.role, viewer.id);
}

/// 准备会话启动的上下文
/// 包括查看者、实时查询提供方与文档存储
pub async fn prepare_session_startup(config: &AppConfig) -> Result<StartupContext> {
    register_builtin_plugins();
    if cfg!(debug_assertions) {
        crate::storage::register::debug_document_store_registry();
        debug!("Debug mode: Document store registry is enabled");
    }

    let viewer = resolve_viewer(config)?;

    let live = MemoryStorage::new();
    if config.app.seed_demo {
        seed_demo(&live, &viewer);
    }

    let documents = create_document_store(&config.store).await?;
    warn!("Document store initialized");

    Ok(StartupContext {
        viewer,
        provider: Arc::new(live),
        documents,
        options: SessionOptions::new(config.sync.clone()),
    })
}
