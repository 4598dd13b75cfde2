//! Emission of the generated workspace file.
//!
//! Downstream consumption of this file is out of scope here, so the
//! emitter stays minimal: the workspace name, the resolved repos as
//! comments for humans, and the registered toolchains and platforms.

use crate::Workspace;

pub const WORKSPACE_FILE_NAME: &str = "WORKSPACE.bzlmod";

pub fn render(ws: &Workspace) -> String {
    let mut out = String::new();
    out.push_str("# Generated by bzlmod resolve. Do not edit.\n");
    out.push_str(&format!("workspace(name = \"{}\")\n", ws.root_module_name));
    if !ws.repos.is_empty() {
        out.push('\n');
        out.push_str("# Resolved repos (fetch with `bzlmod fetch <name>`):\n");
        for (name, repo) in &ws.repos {
            let fingerprint = repo.fetcher.fingerprint();
            if fingerprint.is_empty() {
                out.push_str(&format!("#   {name}\n"));
            } else {
                out.push_str(&format!("#   {name} ({fingerprint})\n"));
            }
        }
    }
    for toolchain in &ws.toolchains {
        out.push_str(&format!("register_toolchains(\"{toolchain}\")\n"));
    }
    for platform in &ws.exec_platforms {
        out.push_str(&format!("register_execution_platforms(\"{platform}\")\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FetcherWrapper, Repo};
    use bzlmod_fetch::{Fetcher, LocalPath};

    #[test]
    fn renders_workspace_name_and_repos() {
        let mut ws = Workspace::new("myproject");
        ws.repos.insert(
            "dep".to_owned(),
            Repo::new(FetcherWrapper::wrap(Fetcher::LocalPath(LocalPath {
                path: "dep".to_owned(),
            }))),
        );
        ws.toolchains.push("//tc:default".to_owned());

        let rendered = render(&ws);
        assert!(rendered.contains("workspace(name = \"myproject\")"));
        assert!(rendered.contains("#   dep"));
        assert!(rendered.contains("register_toolchains(\"//tc:default\")"));
    }
}
