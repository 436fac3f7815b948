/// Base commands `execute_command` may run when the config does not override them.
const ALLOWED_COMMANDS: &[&str] = &[
    // files and directories
    "ls", "pwd", "cd", "mkdir", "rmdir", "touch", "cat", "head", "tail", "less", "more", "wc",
    "sort", "uniq", "grep", "find", "locate", "which", "whereis", "file", "stat", "du", "df",
    "mount", "umount", "chmod", "chown", "chgrp", "ln", "readlink",
    // text processing
    "awk", "sed", "cut", "paste", "join", "diff", "cmp", "comm", "tr", "expand", "unexpand",
    "fold", "fmt", "pr", "column", "nl", "tac", "rev", "base64", "hexdump", "od",
    // system information
    "uname", "hostname", "whoami", "id", "groups", "who", "w", "users", "last", "lastlog",
    "uptime", "date", "cal", "time", "env", "printenv", "set", "ps", "top", "htop", "free",
    "vmstat", "iostat", "sar", "netstat", "ss", "lsof", "fuser", "lscpu", "lsmem",
    // network
    "ping", "traceroute", "nslookup", "dig", "host", "curl", "wget", "nc", "telnet", "ssh",
    "scp", "rsync", "ifconfig", "ip", "route", "arp", "iptables", "ufw",
    // processes
    "kill", "killall", "pkill", "pgrep", "jobs", "bg", "fg", "nohup", "screen", "tmux", "at",
    "crontab", "systemctl", "service", "initctl",
    // archives
    "tar", "gzip", "gunzip", "bzip2", "bunzip2", "xz", "unxz", "zip", "unzip", "7z", "rar",
    "unrar", "cpio", "ar", "zipinfo",
    // package managers
    "apt", "apt-get", "apt-cache", "dpkg", "yum", "dnf", "rpm", "pacman", "brew", "pip", "npm",
    "yarn", "gem", "cargo", "go", "maven", "gradle",
    // development
    "git", "svn", "hg", "make", "cmake", "gcc", "g++", "clang", "python", "python3", "node",
    "java", "javac", "javadoc", "mvn", "docker", "docker-compose", "kubectl", "helm",
    "terraform", "ansible",
    // monitoring
    "journalctl", "dmesg", "syslog", "logger", "watch", "strace", "ltrace", "tcpdump",
    "wireshark", "tcpflow", "ngrep", "iftop", "iotop", "nethogs",
    // utilities
    "man", "info", "help", "type", "alias", "history", "clear", "reset", "stty", "tty", "mesg",
    "write", "wall", "talk", "finger", "whois", "lynx", "links", "elinks", "w3m", "tree", "exa",
    "bat", "fd", "ripgrep",
    // math
    "bc", "dc", "factor", "primes", "seq", "shuf", "random", "expr", "let",
    // misc
    "yes", "no", "true", "false", "echo", "printf", "sleep", "wait", "timeout", "nice",
    "renice", "ionice", "taskset", "chrt", "flock",
];

/// Substrings that deny a command regardless of its base command.
const DENIED_PATTERNS: &[&str] = &[
    // destructive
    "rm ", "rm -", "del ", "format ", "mkfs", "dd if=", "dd of=", "shutdown", "reboot", "halt",
    "poweroff", "init 0", "init 6", "kill -9", "killall -9", "pkill -9",
    // privilege and account changes
    "chmod 777", "chmod +s", "chown root", "passwd", "useradd", "userdel", "groupadd",
    "groupdel", "usermod", "groupmod", "visudo", "sudo ", "su ", "sudoers",
    // listeners and servers
    "nc -l", "netcat -l", "python -m http.server", "python3 -m http.server", "php -s",
    "ruby -run", "perl -mio::socket", "telnetd", "sshd", "ftp", "tftp",
    // raw devices and filesystems
    "mount -o", "umount -f", "fdisk", "parted", "fsck", "badblocks", "dd if=/dev/",
    "dd of=/dev/", "cat > /dev/", "echo > /dev/",
    // scheduling and signals
    "kill -stop", "kill -cont", "renice -20", "nice -20", "ionice -c 1", "taskset -c 0",
    "chrt -f 99", "strace -e trace", "ltrace -e",
    // package removal
    "apt remove", "apt purge", "yum remove", "dnf remove", "pacman -r", "brew uninstall",
    "pip uninstall", "npm uninstall", "gem uninstall", "cargo uninstall",
    // installs and privileged containers
    "make install", "make uninstall", "cmake --install", "docker run --privileged",
    "docker exec --privileged", "kubectl delete", "helm uninstall", "terraform destroy",
    // chained destructive verbs
    "; rm", "; del", "; format", "; shutdown", "; reboot", "&& rm", "&& del", "|| rm", "|| del",
    "| rm", "| del", "> /dev/", ">> /dev/", "2> /dev/",
    // inline interpreters
    "bash -c", "sh -c", "zsh -c", "fish -c", "python -c", "perl -e", "ruby -e", "node -e",
    "php -r", "lua -e", "awk '{", "sed '", "eval", "exec",
    // environment tampering
    "export path=", "export ld_library_path=", "export pythonpath=", "alias rm=", "unalias",
    "hash -r", "builtin", "command", "type -a", "declare -f",
];

#[must_use]
pub fn allowed_commands() -> Vec<String> {
    ALLOWED_COMMANDS.iter().map(|c| (*c).to_string()).collect()
}

/// Interpreters that must never read a script from a pipe (`curl ... | sh`).
const PIPE_INTERPRETERS: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "fish", "python", "python3", "perl", "ruby", "node",
    "php", "lua", "/bin/sh", "/bin/bash", "/usr/bin/env",
];

#[must_use]
pub fn denied_patterns() -> Vec<String> {
    let piped = PIPE_INTERPRETERS
        .iter()
        .flat_map(|i| [format!("| {i}"), format!("|{i}")]);
    DENIED_PATTERNS
        .iter()
        .map(|p| (*p).to_string())
        .chain(piped)
        .collect()
}

/// Folder aliases understood by path resolution, relative to the home directory.
pub const FOLDER_ALIASES: &[(&str, &str)] = &[
    ("downloads", "Downloads"),
    ("documents", "Documents"),
    ("pictures", "Pictures"),
    ("desktop", "Desktop"),
    ("music", "Music"),
    ("videos", "Videos"),
    ("home", ""),
];
