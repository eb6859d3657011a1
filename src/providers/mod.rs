mod bitbucket;
mod github;
mod gitlab;

pub use bitbucket::BitbucketProvider;
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
