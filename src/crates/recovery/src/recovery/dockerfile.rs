//! Line-oriented Dockerfile rewrites used by the built-in strategies
//!
//! Every function here is pure: text in, text out. Reading the original
//! Dockerfile and writing the rewritten variant is the strategies' job.

use regex::Regex;

/// Whether `line` is the given instruction (case-insensitive)
fn is_instruction(line: &str, keyword: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.get(..keyword.len()) {
        Some(head) if head.eq_ignore_ascii_case(keyword) => trimmed[keyword.len()..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace),
        _ => false,
    }
}

fn is_copy_or_add(line: &str) -> bool {
    is_instruction(line, "COPY") || is_instruction(line, "ADD")
}

/// Shell part of a `RUN` line
fn run_command(line: &str) -> &str {
    let trimmed = line.trim();
    if is_instruction(trimmed, "RUN") {
        trimmed[3..].trim_start()
    } else {
        trimmed
    }
}

fn continues(line: &str) -> bool {
    line.trim_end().ends_with('\\')
}

fn installs_system_packages(line: &str) -> bool {
    line.contains("apt-get install") || line.contains("yum install") || line.contains("apk add")
}

/// Rewrite that runs as root where package managers or scripts need it
///
/// - `USER root` right after the first `FROM`
/// - `RUN chmod +x <dest> || true` after a COPY/ADD of scripts
/// - `USER root` before package-manager `RUN` lines when another user is active
pub fn permission_fixed(content: &str) -> String {
    let mut fixed = Vec::new();
    let mut seen_from = false;
    let mut running_as_root = true;

    for line in content.lines() {
        if is_instruction(line, "FROM") {
            fixed.push(line.to_string());
            if !seen_from {
                fixed.push("# Fix permissions for build".to_string());
                fixed.push("USER root".to_string());
                seen_from = true;
            }
            running_as_root = true;
            continue;
        }

        if is_instruction(line, "USER") {
            running_as_root = line.split_whitespace().nth(1) == Some("root");
            fixed.push(line.to_string());
            continue;
        }

        if is_copy_or_add(line) && (line.contains(".sh") || line.contains("script")) {
            fixed.push(line.to_string());
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                fixed.push(format!("RUN chmod +x {} || true", parts[parts.len() - 1]));
            }
            continue;
        }

        if is_instruction(line, "RUN")
            && !running_as_root
            && ["npm", "pip", "apt-get", "yum"].iter().any(|pm| line.contains(pm))
        {
            fixed.push("USER root".to_string());
            running_as_root = true;
        }

        fixed.push(line.to_string());
    }

    fixed.join("\n")
}

/// `ENV k v` to `ENV k=v`, and a space before trailing line continuations
pub fn fix_syntax(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim();

            if is_instruction(trimmed, "ENV") {
                let body = trimmed[3..].trim_start();
                if !body.contains('=') {
                    if let Some((key, value)) = body.split_once(char::is_whitespace) {
                        return format!("ENV {}={}", key, value.trim_start());
                    }
                }
            }

            if trimmed.len() > 1 && trimmed.ends_with('\\') {
                let head = line.trim_end().trim_end_matches('\\');
                if !head.ends_with(' ') {
                    return format!("{} \\", head);
                }
            }

            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `MAINTAINER` to a label, remote `ADD` to `curl`
pub fn update_deprecated(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim();

            if is_instruction(trimmed, "MAINTAINER") {
                let who = trimmed["MAINTAINER".len()..].trim();
                return format!("LABEL maintainer=\"{}\"", who.replace('"', "\\\""));
            }

            if is_instruction(trimmed, "ADD")
                && (trimmed.contains("http://") || trimmed.contains("https://"))
            {
                let parts: Vec<&str> = trimmed.split_whitespace().collect();
                if parts.len() >= 3 {
                    return format!("RUN curl -fsSL {} -o {}", parts[1], parts[2]);
                }
            }

            line.to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Make absolute COPY/ADD sources relative to the build context (except `/tmp`)
pub fn fix_copy_sources(content: &str) -> String {
    content
        .lines()
        .map(|line| {
            if !is_copy_or_add(line) {
                return line.to_string();
            }
            let mut parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return line.to_string();
            }
            // skip flags such as --chown=app
            let Some(src_index) = (1..parts.len() - 1).find(|&i| !parts[i].starts_with("--")) else {
                return line.to_string();
            };
            let src = parts[src_index];
            if src.starts_with('/') && !src.starts_with("/tmp") && !src.contains("://") {
                parts[src_index] = src.trim_start_matches('/');
                parts.join(" ")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const IMAGE_TYPOS: &[(&str, &str)] = &[
    ("ubunut", "ubuntu"),
    ("apline", "alpine"),
    ("nginix", "nginx"),
];

/// Correct common image-name typos and pin untagged images to `:latest`
///
/// References to earlier build stages are left alone.
pub fn fix_base_images(content: &str) -> String {
    let mut stages: Vec<String> = Vec::new();
    let mut fixed = Vec::new();

    for line in content.lines() {
        if !is_instruction(line, "FROM") {
            fixed.push(line.to_string());
            continue;
        }
        let mut parts: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        let Some(index) = (1..parts.len()).find(|&i| !parts[i].starts_with("--")) else {
            fixed.push(line.to_string());
            continue;
        };

        let original = parts[index].clone();
        let mut image = original.clone();
        if !stages.contains(&image.to_lowercase()) {
            for (typo, correct) in IMAGE_TYPOS {
                if image.contains(typo) {
                    image = image.replace(typo, correct);
                }
            }
            let untagged = !image.contains(':') && !image.contains('@');
            if untagged && image != "scratch" && !image.starts_with('$') {
                image.push_str(":latest");
            }
        }

        if let Some(alias) = parts
            .iter()
            .position(|p| p.eq_ignore_ascii_case("AS"))
            .and_then(|i| parts.get(i + 1))
        {
            stages.push(alias.to_lowercase());
        }

        if image == original {
            fixed.push(line.to_string());
        } else {
            parts[index] = image;
            fixed.push(parts.join(" "));
        }
    }

    fixed.join("\n")
}

/// Package-manager hygiene
///
/// - `apt-get install` gains `-y` and runs after `apt-get update` in the same layer
/// - `npm install` becomes `npm ci` followed by a cache clean
/// - `pip install` gains `--no-cache-dir`, preceded once by a pip upgrade
///
/// Only single-line instructions are restructured. Lines inside a `\`
/// continuation get in-place flag changes at most.
pub fn fix_package_managers(content: &str) -> String {
    let mut fixed = Vec::new();
    let mut pip_upgraded = content.contains("pip install --upgrade pip");
    let mut in_continuation = false;

    for line in content.lines() {
        let continued = in_continuation;
        in_continuation = continues(line);
        let single_line = !continued && !in_continuation;
        let mut line = line.to_string();

        if line.contains("apt-get install") && single_line {
            if !line.contains("-y") {
                line = line.replace("apt-get install", "apt-get install -y");
            }
            if !line.contains("apt-get update") {
                fixed.push(format!(
                    "RUN apt-get update && {} && rm -rf /var/lib/apt/lists/*",
                    run_command(&line)
                ));
                continue;
            }
        }

        if line.contains("npm install") && single_line {
            if !line.contains("--production") {
                line = line.replace("npm install", "npm ci");
            }
            if !line.contains("cache clean") {
                line.push_str(" && npm cache clean --force");
            }
        }

        if line.contains("pip install") && !line.contains("--upgrade pip") {
            if !line.contains("--no-cache-dir") {
                line = line.replace("pip install", "pip install --no-cache-dir");
            }
            if !pip_upgraded && !continued {
                fixed.push("RUN pip install --upgrade pip".to_string());
                pip_upgraded = true;
            }
        }

        fixed.push(line);
    }

    fixed.join("\n")
}

/// Wrap single-line system package installs in a three-try loop
pub fn add_install_retries(content: &str) -> String {
    let mut fixed = Vec::new();

    for line in content.lines() {
        if is_instruction(line, "RUN") && installs_system_packages(line) && !continues(line) {
            fixed.push("# Retry package installation".to_string());
            fixed.push("RUN for i in 1 2 3; do \\".to_string());
            fixed.push(format!("    {} && break || \\", run_command(line)));
            fixed.push("    { echo \"Retry $i failed, waiting...\"; sleep 5; }; \\".to_string());
            fixed.push("    done".to_string());
            continue;
        }
        fixed.push(line.to_string());
    }

    fixed.join("\n")
}

/// Retry and mirror settings for the distro of the first `FROM`
pub fn add_package_sources(content: &str) -> String {
    let mut fixed = Vec::new();
    let mut done = false;

    for line in content.lines() {
        fixed.push(line.to_string());
        if done || !is_instruction(line, "FROM") {
            continue;
        }
        done = true;

        if line.contains("ubuntu") || line.contains("debian") {
            fixed.push("# Retry apt downloads".to_string());
            fixed.push(
                "RUN echo 'Acquire::Retries \"3\";' > /etc/apt/apt.conf.d/80-retries".to_string(),
            );
        } else if line.contains("alpine") {
            fixed.push("# Add alternative Alpine mirror".to_string());
            fixed.push(
                "RUN echo 'https://dl-cdn.alpinelinux.org/alpine/edge/main' >> /etc/apk/repositories"
                    .to_string(),
            );
        } else if line.contains("centos") || line.contains("rhel") {
            fixed.push("# Configure yum retries".to_string());
            fixed.push("RUN echo 'retries=5' >> /etc/yum.conf".to_string());
        }
    }

    fixed.join("\n")
}

const PACKAGE_PATTERNS: &[&str] = &[
    r"package '([^']+)'",
    r"Package (\S+) is not available",
    r"No package (\S+) available",
    r"Unable to locate package (\S+)",
    r"(\S+): not found",
];

/// Package names mentioned in a package-manager error, in order of appearance per pattern
pub fn extract_package_names(error_message: &str) -> Vec<String> {
    let mut packages: Vec<String> = Vec::new();

    for pattern in PACKAGE_PATTERNS {
        let Ok(re) = Regex::new(pattern) else {
            continue;
        };
        for caps in re.captures_iter(error_message) {
            if let Some(name) = caps.get(1).map(|m| m.as_str().to_string()) {
                if !packages.contains(&name) {
                    packages.push(name);
                }
            }
        }
    }

    packages
}

/// Relax version resolution for the named packages on install lines
///
/// apt installs become `pkg=*`, npm installs `pkg@latest`.
pub fn pin_packages(content: &str, packages: &[String]) -> String {
    if packages.is_empty() {
        return content.to_string();
    }

    content
        .lines()
        .map(|line| {
            let apt = line.contains("apt-get install");
            let npm = line.contains("npm install") || line.contains("npm ci");
            if !apt && !npm {
                return line.to_string();
            }
            line.split(' ')
                .map(|token| match packages.iter().find(|p| p.as_str() == token) {
                    Some(pkg) if apt => format!("{}=*", pkg),
                    Some(pkg) => format!("{}@latest", pkg),
                    None => token.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clean up after installs and add a final cleanup layer
pub fn optimize_for_space(content: &str) -> String {
    let mut optimized = Vec::new();

    for line in content.lines() {
        let mut line = line.to_string();
        let multi_line = continues(&line);

        if !multi_line && line.contains("apt-get install") {
            optimized.push(format!("{} && \\", line));
            optimized.push("    apt-get clean && \\".to_string());
            optimized.push("    rm -rf /var/lib/apt/lists/* /tmp/* /var/tmp/*".to_string());
            continue;
        }

        if !multi_line && line.contains("yum install") {
            optimized.push(format!("{} && \\", line));
            optimized.push("    yum clean all && \\".to_string());
            optimized.push("    rm -rf /var/cache/yum".to_string());
            continue;
        }

        if line.contains("apk add") && !line.contains("--no-cache") {
            line = line.replace("apk add", "apk add --no-cache");
        }

        if !multi_line && line.contains("npm install") {
            optimized.push(format!("{} && \\", line));
            optimized.push("    npm cache clean --force && \\".to_string());
            optimized.push("    rm -rf /tmp/*".to_string());
            continue;
        }

        if line.contains("pip install") && !line.contains("--no-cache-dir") {
            line = line.replace("pip install", "pip install --no-cache-dir");
        }

        optimized.push(line);
    }

    optimized.push(String::new());
    optimized.push("# Final cleanup to reduce image size".to_string());
    optimized.push(
        "RUN rm -rf /tmp/* /var/tmp/* /var/cache/* /usr/share/doc/* /usr/share/man/* || true"
            .to_string(),
    );
    optimized.join("\n")
}
