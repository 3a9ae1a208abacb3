//! 查看者会话
//!
//! 一个 [`SyncSession`] 持有某个查看者的全部同步资源：
//! 班级订阅（按角色查询成员关系）→ 以班级 ID 为键的作业/公告/聊天/资料订阅
//! → 以作业 ID 为键的提交订阅。状态每次变化时重新派生通知流并发布到 `watch` 通道。
//!
//! 会话之间不共享任何全局状态，同一进程内可以同时运行多个会话。

use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::models::analytics::responses::{GradeDistribution, LeaderboardEntry};
use crate::models::notifications::responses::NotificationFeed;
use crate::models::{
    Announcement, Assignment, ChatMessage, ClassRoom, Material, Submission, Viewer, ViewerRole,
};
use crate::services::AnalyticsService;
use crate::services::notifications::{NotificationWindows, ReadStateTracker, derive_notifications_with};
use crate::storage::{DocumentStore, Filter, LiveQuery, LiveQueryProvider};
use crate::sync::{
    MergeScope, PartitionedSubscription, StateStore, SubscriptionHandle, SyncRecord, SyncedState,
    spawn_live_query,
};

/// 会话参数
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub settings: SyncConfig,
    pub windows: NotificationWindows,
    // 没有状态变化时也定期重算，时间窗口会随时间推移而变化
    pub feed_refresh: Duration,
}

impl SessionOptions {
    pub fn new(settings: SyncConfig) -> Self {
        Self {
            settings,
            windows: NotificationWindows::default(),
            feed_refresh: Duration::from_secs(60),
        }
    }

    pub fn with_windows(mut self, windows: NotificationWindows) -> Self {
        self.windows = windows;
        self
    }

    pub fn with_feed_refresh(mut self, feed_refresh: Duration) -> Self {
        self.feed_refresh = feed_refresh;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}

pub struct SyncSession {
    viewer: Viewer,
    store: StateStore,
    read_state: ReadStateTracker,
    analytics: AnalyticsService,
    feed: watch::Receiver<NotificationFeed>,
    shutdown: watch::Sender<bool>,
    classes: Option<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncSession {
    /// 启动会话：加载已读状态，打开班级订阅，并启动键驱动与通知派生任务
    pub async fn start(
        viewer: Viewer,
        provider: Arc<dyn LiveQueryProvider>,
        documents: Arc<dyn DocumentStore>,
        options: SessionOptions,
    ) -> Self {
        let SessionOptions {
            settings,
            windows,
            feed_refresh,
        } = options;

        let store = StateStore::new();
        let read_state = ReadStateTracker::new(viewer.id.clone(), documents, &settings);
        if let Err(e) = read_state.load().await {
            warn!(
                "Failed to load read state for {}: {}",
                viewer.id,
                e.format_simple()
            );
        }

        let (shutdown, _) = watch::channel(false);

        let classes = spawn_live_query::<ClassRoom>(
            provider.clone(),
            store.clone(),
            settings.clone(),
            membership_query(&viewer),
            MergeScope::All,
        );

        let coordinators = Coordinators::new(provider, store.clone(), settings, &viewer);
        let driver = tokio::spawn(run_driver(
            store.clone(),
            viewer.clone(),
            coordinators,
            shutdown.subscribe(),
        ));

        let (feed_tx, feed) = watch::channel(NotificationFeed::default());
        let feed_task = tokio::spawn(run_feed(
            store.clone(),
            read_state.clone(),
            viewer.clone(),
            windows,
            feed_refresh,
            feed_tx,
            shutdown.subscribe(),
        ));

        info!("Sync session started for {} {}", viewer.role, viewer.id);

        Self {
            analytics: AnalyticsService::new(store.clone()),
            viewer,
            store,
            read_state,
            feed,
            shutdown,
            classes: Some(classes),
            tasks: vec![driver, feed_task],
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// 当前状态快照（只读）
    pub fn state(&self) -> Arc<SyncedState> {
        self.store.snapshot()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<SyncedState>> {
        self.store.subscribe()
    }

    /// 订阅同步错误（订阅失败、重连）
    pub fn sync_errors(&self) -> broadcast::Receiver<SyncError> {
        self.store.subscribe_errors()
    }

    pub fn feed(&self) -> NotificationFeed {
        self.feed.borrow().clone()
    }

    pub fn subscribe_feed(&self) -> watch::Receiver<NotificationFeed> {
        self.feed.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.read_state.unread_count(&self.feed.borrow().items)
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.read_state.is_read(id)
    }

    pub fn mark_read<S: Into<String>>(&self, id: S) -> JoinHandle<()> {
        self.read_state.mark_read(id)
    }

    /// 把当前通知流中的全部条目标记为已读
    pub fn mark_all_read(&self) -> JoinHandle<()> {
        let ids = self.feed.borrow().ids();
        self.read_state.mark_all_read(ids)
    }

    pub fn read_state(&self) -> &ReadStateTracker {
        &self.read_state
    }

    pub fn analytics(&self) -> &AnalyticsService {
        &self.analytics
    }

    pub fn completion_rate(&self, assignment_id: &str) -> u32 {
        self.analytics.completion_rate(assignment_id)
    }

    pub fn grade_distribution(&self, class_id: &str) -> GradeDistribution {
        self.analytics.grade_distribution(class_id)
    }

    pub fn leaderboard(&self, class_id: &str) -> Vec<LeaderboardEntry> {
        self.analytics.leaderboard(class_id)
    }

    /// 当前查看者的连续提交天数
    pub fn streak(&self, today: NaiveDate) -> u32 {
        self.analytics.streak(&self.viewer.id, today)
    }

    /// 结束会话（登出），释放全部订阅后返回
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        if let Some(classes) = self.classes.take() {
            classes.close().await;
        }
        info!("Sync session for {} closed", self.viewer.id);
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 查看者所属班级的查询
fn membership_query(viewer: &Viewer) -> LiveQuery {
    let query = LiveQuery::collection(ClassRoom::COLLECTION);
    match viewer.role {
        ViewerRole::Teacher => query.where_eq("teacherId", viewer.id.clone()),
        ViewerRole::Student => query.where_array_contains("studentIds", viewer.id.clone()),
    }
}

struct Coordinators {
    store: StateStore,
    assignments: PartitionedSubscription<Assignment>,
    announcements: PartitionedSubscription<Announcement>,
    chat_messages: PartitionedSubscription<ChatMessage>,
    materials: PartitionedSubscription<Material>,
    submissions: PartitionedSubscription<Submission>,
}

impl Coordinators {
    fn new(
        provider: Arc<dyn LiveQueryProvider>,
        store: StateStore,
        settings: SyncConfig,
        viewer: &Viewer,
    ) -> Self {
        let mut submissions =
            PartitionedSubscription::new(provider.clone(), store.clone(), settings.clone());
        if !viewer.is_teacher() {
            submissions = submissions.with_constraint(Filter::Eq {
                field: "studentId".to_string(),
                value: viewer.id.clone(),
            });
        }

        Self {
            assignments: PartitionedSubscription::new(
                provider.clone(),
                store.clone(),
                settings.clone(),
            ),
            announcements: PartitionedSubscription::new(
                provider.clone(),
                store.clone(),
                settings.clone(),
            ),
            chat_messages: PartitionedSubscription::new(
                provider.clone(),
                store.clone(),
                settings.clone(),
            ),
            materials: PartitionedSubscription::new(provider, store.clone(), settings),
            submissions,
            store,
        }
    }

    /// 让各集合的键集合跟上最新状态
    async fn sync_keys(&mut self, state: &SyncedState, viewer: &Viewer) {
        let class_ids: Vec<String> = state.classes_for(viewer).map(|c| c.id.clone()).collect();

        let mut changed = self.assignments.rekey(class_ids.clone()).await;
        changed |= self.announcements.rekey(class_ids.clone()).await;
        changed |= self.chat_messages.rekey(class_ids.clone()).await;
        changed |= self.materials.rekey(class_ids.clone()).await;

        // 作业可能刚被清理，取最新快照
        let current = self.store.snapshot();
        let class_set: HashSet<&str> = class_ids.iter().map(String::as_str).collect();
        let assignment_ids: Vec<String> = current
            .assignments
            .iter()
            .filter(|a| class_set.contains(a.class_id.as_str()))
            .map(|a| a.id.clone())
            .collect();
        changed |= self.submissions.rekey(assignment_ids).await;

        if changed {
            debug!(
                "Keys updated for {}: {} classes, {} submission chunks",
                viewer.id,
                class_ids.len(),
                self.submissions.chunk_count()
            );
        }
    }

    async fn teardown(&mut self) {
        self.assignments.teardown().await;
        self.announcements.teardown().await;
        self.chat_messages.teardown().await;
        self.materials.teardown().await;
        self.submissions.teardown().await;
    }
}

async fn run_driver(
    store: StateStore,
    viewer: Viewer,
    mut coordinators: Coordinators,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state_rx = store.subscribe();

    loop {
        if *shutdown.borrow() {
            break;
        }
        let state = state_rx.borrow_and_update().clone();
        coordinators.sync_keys(&state, &viewer).await;

        tokio::select! {
            _ = shutdown.changed() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    coordinators.teardown().await;
    debug!("Key driver for {} stopped", viewer.id);
}

async fn run_feed(
    store: StateStore,
    read_state: ReadStateTracker,
    viewer: Viewer,
    windows: NotificationWindows,
    refresh: Duration,
    feed_tx: watch::Sender<NotificationFeed>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state_rx = store.subscribe();
    let mut reads_rx = read_state.subscribe();
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let state = state_rx.borrow_and_update().clone();
        reads_rx.borrow_and_update();

        let items = derive_notifications_with(&state, &viewer, Utc::now(), &windows);
        let feed = NotificationFeed {
            state_version: state.version,
            unread_count: read_state.unread_count(&items),
            items,
        };
        let published = feed_tx.send_if_modified(|current| {
            if *current == feed {
                return false;
            }
            *current = feed;
            true
        });
        if published {
            debug!("Notification feed updated for {}", viewer.id);
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = reads_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }
    }
}
