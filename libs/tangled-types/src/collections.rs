//! Collection NSIDs for every record kind the appview ingests or writes.

pub const REPO: &str = "sh.tangled.repo";
pub const FOLLOW: &str = "sh.tangled.graph.follow";
pub const STAR: &str = "sh.tangled.feed.star";
pub const REACTION: &str = "sh.tangled.feed.reaction";
pub const ISSUE: &str = "sh.tangled.repo.issue";
pub const ISSUE_COMMENT: &str = "sh.tangled.repo.issue.comment";
pub const ISSUE_STATE: &str = "sh.tangled.repo.issue.state";
pub const PULL: &str = "sh.tangled.repo.pull";
pub const ARTIFACT: &str = "sh.tangled.repo.artifact";
pub const LABEL_DEF: &str = "sh.tangled.label.definition";
pub const LABEL_OP: &str = "sh.tangled.label.op";
pub const PROFILE: &str = "sh.tangled.actor.profile";
pub const PUBLIC_KEY: &str = "sh.tangled.publickey";
pub const KNOT_MEMBER: &str = "sh.tangled.knot.member";
pub const SPINDLE_MEMBER: &str = "sh.tangled.spindle.member";
pub const PIPELINE_STATUS: &str = "sh.tangled.pipeline.status";
pub const GIT_REF_UPDATE: &str = "sh.tangled.git.ref.update";
pub const STRING: &str = "sh.tangled.string";
